use std::path::PathBuf;

use tokio::{
    task::JoinHandle,
    time::{self, Duration},
};

use crate::application::backup::BackupCreator;

struct AutoBackupWorker {
    period: Duration,
    dir: PathBuf,
    creator: BackupCreator,
}

impl AutoBackupWorker {
    async fn run(self) {
        let mut backup_interval = time::interval(self.period);
        // the first tick completes immediately
        backup_interval.tick().await;

        loop {
            backup_interval.tick().await;
            info!("start automatic backup");
            match self.creator.write_backup(&self.dir, true).await {
                Ok(path) => info!("automatic backup written to {}", path.display()),
                Err(e) => error!("failed automatic backup: {e}"),
            }
        }
    }
}

/// Writes a backup into `dir` every `interval_hours`. Returns `None` when
/// automatic backups are disabled.
pub fn start(interval_hours: u64, dir: PathBuf, creator: BackupCreator) -> Option<JoinHandle<()>> {
    if interval_hours == 0 {
        info!("automatic backups disabled");
        return None;
    }

    let worker = AutoBackupWorker {
        period: Duration::from_secs(interval_hours * 3600),
        dir,
        creator,
    };

    Some(tokio::spawn(worker.run()))
}
