#[macro_use]
extern crate log;

use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use shiori::{
    application::{
        backup::{BackupCreator, BackupRestorer},
        worker::{
            self,
            downloads::{Downloader, DownloaderEvent, DownloaderOptions},
        },
    },
    domain::services::{download::DownloadService, tracker::TrackerService},
    infrastructure::{
        chapter_cache::ChapterCache,
        config::{Config, GLOBAL_CONFIG},
        database,
        domain::repositories::repositories,
        download_cache::DownloadCache,
        download_provider::DownloadProvider,
        download_store::DownloadStore,
        local::LocalSource,
        sources::SourceManager,
    },
};
use tokio_stream::{StreamExt, wrappers::BroadcastStream};

#[derive(Parser)]
struct Opts {
    /// Path to config file
    #[clap(long)]
    config: Option<String>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create or restore library backups
    Backup {
        #[clap(subcommand)]
        command: BackupCommand,
    },
    /// Inspect or run the download queue
    Downloads {
        #[clap(subcommand)]
        command: DownloadsCommand,
    },
    /// Run the downloader and the background workers until interrupted
    Serve,
}

#[derive(Subcommand)]
enum BackupCommand {
    Create {
        /// Directory to write to, the configured backup path by default
        #[clap(long)]
        output: Option<PathBuf>,
    },
    Restore { file: PathBuf },
}

#[derive(Subcommand)]
enum DownloadsCommand {
    List,
    Resume,
    Clear,
}

fn log_events(downloader: &Downloader) {
    let mut events = BroadcastStream::new(downloader.subscribe_events());
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                Ok(DownloaderEvent::Completed { chapter_id }) => {
                    debug!("chapter {chapter_id} downloaded")
                }
                Ok(DownloaderEvent::Error { message, .. }) => error!("{message}"),
                Ok(DownloaderEvent::NoSpace { chapter_id }) => {
                    error!("no space left to download chapter {chapter_id}")
                }
                Ok(DownloaderEvent::Warning(message)) => warn!("{message}"),
                Err(e) => warn!("missed downloader events: {e}"),
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    if let Ok(rust_log) = std::env::var("RUST_LOG") {
        info!("rust_log: {rust_log}");
    } else if let Ok(shiori_log) = std::env::var("SHIORI_LOG") {
        info!("shiori_log: {shiori_log}");
        // SAFETY: nothing has read the environment yet
        unsafe {
            std::env::set_var(
                "RUST_LOG",
                format!("shiori={shiori_log},shiori_lib={shiori_log}"),
            );
        }
    }

    env_logger::init();

    let opts: Opts = Opts::parse();
    let config = Config::open(opts.config.as_ref())?;
    let config = GLOBAL_CONFIG.get_or_init(|| config);

    debug!("config: {config:?}");

    let pool = database::establish_connection(&config.database_path, config.create_database).await?;
    let repos = repositories(pool.clone());

    let sources = Arc::new(SourceManager::new(LocalSource::new(&config.local_path)));
    let cache = Arc::new(DownloadCache::new(DownloadProvider::new(&config.download_path)));
    let chapter_cache = ChapterCache::new(&config.cache_path);
    let store = DownloadStore::open(PathBuf::from(&config.cache_path).join("downloads.json"));
    let downloader = Downloader::new(
        cache.clone(),
        chapter_cache,
        store,
        DownloaderOptions::from(&config.downloads),
    );
    let downloads = Arc::new(DownloadService::new(
        repos.clone(),
        sources.clone(),
        cache,
        downloader.clone(),
    ));

    match opts.command {
        Command::Backup {
            command: BackupCommand::Create { output },
        } => {
            let dir = output.unwrap_or_else(|| PathBuf::from(&config.backup_path));
            let creator = BackupCreator::new(repos, sources, config.backup.clone());
            let path = creator.write_backup(&dir, false).await?;
            println!("{}", path.display());
        }
        Command::Backup {
            command: BackupCommand::Restore { file },
        } => {
            let report = BackupRestorer::new(repos, sources).restore_file(&file).await?;
            println!("restored {} manga", report.restored);
            for name in &report.missing_sources {
                println!("missing source: {name}");
            }
            for (title, error) in &report.errors {
                println!("failed to restore {title}: {error}");
            }
        }
        Command::Downloads {
            command: DownloadsCommand::List,
        } => {
            downloads.restore_queue().await?;
            for download in downloader.queue() {
                println!(
                    "{:?}\t{}\t{}",
                    download.state(),
                    download.manga.title,
                    download.chapter.name
                );
            }
        }
        Command::Downloads {
            command: DownloadsCommand::Clear,
        } => {
            downloader.store().clear();
            info!("download queue cleared");
        }
        Command::Downloads {
            command: DownloadsCommand::Resume,
        } => {
            let restored = downloads.restore_queue().await?;
            info!("restored {restored} downloads");
            log_events(&downloader);

            let mut running = downloader.subscribe_running();
            if downloader.start() {
                tokio::select! {
                    _ = running.wait_for(|running| !*running) => {
                        info!("download queue finished");
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("ctrl+c signal");
                        downloader.pause();
                    }
                }
            }
        }
        Command::Serve => {
            let restored = downloads.restore_queue().await?;
            info!("restored {restored} downloads");
            log_events(&downloader);
            downloader.start();

            let tracker = Arc::new(TrackerService::new(repos.track.clone(), vec![]));
            let tracking_worker_handle =
                worker::tracking::start(config.tracking.retry_interval, tracker);
            let backup_worker_handle = worker::backup::start(
                config.backup.interval_hours,
                PathBuf::from(&config.backup_path),
                BackupCreator::new(repos, sources, config.backup.clone()),
            );
            let backup_worker = async {
                match backup_worker_handle {
                    Some(handle) => handle.await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = tracking_worker_handle => {
                    info!("tracking worker quit");
                }
                _ = backup_worker => {
                    info!("backup worker quit");
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("ctrl+c signal");
                }
            }

            downloader.pause();
        }
    }

    info!("closing database...");
    pool.close().await;

    Ok(())
}
