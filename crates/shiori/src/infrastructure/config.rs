use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

pub static GLOBAL_CONFIG: OnceCell<Config> = OnceCell::new();

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct DownloadConfig {
    #[serde(default = "default_true")]
    pub save_chapters_as_cbz: bool,
    #[serde(default)]
    pub split_tall_images: bool,
    #[serde(default)]
    pub password_protect_downloads: bool,
    #[serde(default)]
    pub cbz_password: Option<String>,
    /// height / width above which an image is split
    #[serde(default = "default_tall_image_ratio")]
    pub tall_image_ratio: f64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            save_chapters_as_cbz: true,
            split_tall_images: false,
            password_protect_downloads: false,
            cbz_password: None,
            tall_image_ratio: default_tall_image_ratio(),
        }
    }
}

impl DownloadConfig {
    /// Password used for new archives, `None` when encryption is off
    pub fn archive_password(&self) -> Option<String> {
        if self.password_protect_downloads {
            self.cbz_password.clone().filter(|p| !p.is_empty())
        } else {
            None
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ReaderConfig {
    #[serde(default)]
    pub preserve_reading_position: bool,
    /// chapters downloaded ahead of the one being read, 0 disables it
    #[serde(default)]
    pub download_ahead: usize,
    /// delete the chapter this many chapters behind the one just read,
    /// `None` disables it
    #[serde(default)]
    pub remove_after_read_slots: Option<usize>,
    #[serde(default = "default_true")]
    pub skip_read: bool,
    #[serde(default = "default_true")]
    pub skip_filtered: bool,
    #[serde(default)]
    pub incognito: bool,
    #[serde(default = "default_true")]
    pub auto_update_track: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            preserve_reading_position: false,
            download_ahead: 0,
            remove_after_read_slots: None,
            skip_read: true,
            skip_filtered: true,
            incognito: false,
            auto_update_track: true,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct BackupConfig {
    /// 0 disables automatic backups
    #[serde(default = "default_backup_interval")]
    pub interval_hours: u64,
    #[serde(default = "default_number_of_backups")]
    pub number_of_backups: usize,
    #[serde(default = "default_true")]
    pub include_categories: bool,
    #[serde(default = "default_true")]
    pub include_chapters: bool,
    #[serde(default = "default_true")]
    pub include_tracking: bool,
    #[serde(default = "default_true")]
    pub include_history: bool,
    #[serde(default)]
    pub include_non_library_entries: bool,
    #[serde(default = "default_true")]
    pub include_custom_info: bool,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            interval_hours: default_backup_interval(),
            number_of_backups: default_number_of_backups(),
            include_categories: true,
            include_chapters: true,
            include_tracking: true,
            include_history: true,
            include_non_library_entries: false,
            include_custom_info: true,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct TrackingConfig {
    /// seconds between two runs of the delayed tracking update worker
    #[serde(default = "default_retry_interval")]
    pub retry_interval: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            retry_interval: default_retry_interval(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Config {
    #[serde(skip)]
    path: PathBuf,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_true")]
    pub create_database: bool,
    #[serde(default = "default_download_path")]
    pub download_path: String,
    #[serde(default = "default_cache_path")]
    pub cache_path: String,
    #[serde(default = "default_backup_path")]
    pub backup_path: String,
    #[serde(default = "default_local_path")]
    pub local_path: String,
    #[serde(default)]
    pub downloads: DownloadConfig,
    #[serde(default)]
    pub reader: ReaderConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: shiori_home().join("config.yml"),
            database_path: default_database_path(),
            create_database: true,
            download_path: default_download_path(),
            cache_path: default_cache_path(),
            backup_path: default_backup_path(),
            local_path: default_local_path(),
            downloads: DownloadConfig::default(),
            reader: ReaderConfig::default(),
            backup: BackupConfig::default(),
            tracking: TrackingConfig::default(),
        }
    }
}

fn shiori_home() -> PathBuf {
    match std::env::var("SHIORI_HOME") {
        Ok(path) => PathBuf::from(path),
        Err(_) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".shiori"),
    }
}

fn home_dir(name: &str) -> String {
    let path = shiori_home().join(name);
    if !path.exists() {
        let _ = std::fs::create_dir_all(&path);
    }
    path.display().to_string()
}

fn default_true() -> bool {
    true
}

fn default_tall_image_ratio() -> f64 {
    3.0
}

fn default_backup_interval() -> u64 {
    12
}

fn default_number_of_backups() -> usize {
    2
}

fn default_retry_interval() -> u64 {
    3600
}

fn default_database_path() -> String {
    let path = shiori_home();
    if !path.exists() {
        let _ = std::fs::create_dir_all(&path);
    }
    path.join("shiori.db").display().to_string()
}

fn default_download_path() -> String {
    home_dir("downloads")
}

fn default_cache_path() -> String {
    home_dir("cache")
}

fn default_backup_path() -> String {
    home_dir("backup")
}

fn default_local_path() -> String {
    home_dir("local")
}

impl Config {
    pub fn open<P: AsRef<Path>>(path: Option<P>) -> Result<Config, anyhow::Error> {
        let config_path = match path {
            Some(p) => PathBuf::new().join(p),
            None => shiori_home().join("config.yml"),
        };

        match std::fs::File::open(&config_path) {
            Ok(file) => {
                info!("Open config from {:?}", config_path);
                let mut cfg: Self = serde_yml::from_reader(file)?;
                cfg.path = config_path;
                Ok(cfg)
            }
            Err(_) => {
                let cfg = Config {
                    path: config_path,
                    ..Default::default()
                };
                cfg.save()?;
                info!("Write default config at {:?}", cfg.path);
                Ok(cfg)
            }
        }
    }

    pub fn save(&self) -> Result<(), anyhow::Error> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_yml::to_string(&self)?)?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
