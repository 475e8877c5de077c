use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use fancy_regex::Regex;
use thiserror::Error;

use crate::domain::repositories::RepositoryError;

pub mod codec;
pub mod creator;
pub mod restorer;

pub use creator::BackupCreator;
pub use restorer::{BackupRestorer, RestoreReport};

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("repository error: {0}")]
    RepositoryError(#[from] RepositoryError),
    #[error("failed to encode backup: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("failed to decode backup: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("other error: {0}")]
    OtherError(#[from] anyhow::Error),
}

pub fn backup_filename(now: DateTime<Local>) -> String {
    format!("tachiyomi_sy_{}.proto.gz", now.format("%Y-%m-%d_%H-%M"))
}

/// Whether `name` looks like a file written by an automatic backup
pub fn is_backup_file(name: &str) -> bool {
    let Ok(re) = Regex::new(r"^tachiyomi(_sy)?_\d+-\d+-\d+_\d+-\d+\.proto\.gz$") else {
        return false;
    };
    re.is_match(name).unwrap_or(false)
}

/// Deletes old automatic backups of `dir` so that `keep` remain, newest first
pub fn rotate_backups(dir: &Path, keep: usize) -> Result<Vec<PathBuf>, BackupError> {
    let mut backups: Vec<(std::time::SystemTime, PathBuf)> = dir
        .read_dir()?
        .filter_map(Result::ok)
        .filter(|entry| is_backup_file(&entry.file_name().to_string_lossy()))
        .filter_map(|entry| {
            let modified = entry.metadata().and_then(|m| m.modified()).ok()?;
            Some((modified, entry.path()))
        })
        .collect();
    backups.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));

    let mut deleted = vec![];
    for (_, path) in backups.into_iter().skip(keep) {
        match std::fs::remove_file(&path) {
            Ok(_) => deleted.push(path),
            Err(e) => warn!("failed to delete old backup {}: {e}", path.display()),
        }
    }

    Ok(deleted)
}
