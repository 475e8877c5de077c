use std::sync::Arc;

use tokio::{
    sync::Notify,
    task::JoinHandle,
    time::{self, Duration},
};

use crate::domain::services::tracker::TrackerService;

const DEFAULT_PERIOD_SECS: u64 = 3600;
const MAX_NOTIFY_DELAY_SECS: u64 = 60;

/// Pushes tracking updates that failed earlier, periodically and whenever a
/// new one is stored
struct DelayedTrackingWorker {
    period: Duration,
    /// wait after a failure before retrying
    notify_delay: Duration,
    tracker: Arc<TrackerService>,
    notify: Arc<Notify>,
}

impl DelayedTrackingWorker {
    async fn retry(&self) {
        match self.tracker.retry_delayed().await {
            Ok(0) => {}
            Ok(done) => info!("sent {done} delayed tracking updates"),
            Err(e) => error!("failed to send delayed tracking updates: {e}"),
        }
    }

    async fn run(self) {
        let mut retry_interval = time::interval(self.period);

        loop {
            tokio::select! {
                _ = retry_interval.tick() => {
                    self.retry().await;
                }
                _ = self.notify.notified() => {
                    time::sleep(self.notify_delay).await;
                    self.retry().await;
                    retry_interval.reset();
                }
            }
        }
    }
}

/// Retries delayed tracking updates every `period` seconds, 0 means hourly
pub fn start(period: u64, tracker: Arc<TrackerService>) -> JoinHandle<()> {
    let period = if period == 0 { DEFAULT_PERIOD_SECS } else { period };
    let worker = DelayedTrackingWorker {
        period: Duration::from_secs(period),
        notify_delay: Duration::from_secs(period.min(MAX_NOTIFY_DELAY_SECS)),
        notify: tracker.delayed_notify(),
        tracker,
    };

    tokio::spawn(worker.run())
}
