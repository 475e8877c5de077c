use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Notify;

use crate::domain::{
    entities::track::{DelayedTrackingUpdate, Track},
    repositories::{RepositoryError, track::TrackRepository},
};

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("repository error: {0}")]
    RepositoryError(#[from] RepositoryError),
    #[error("other error: {0}")]
    OtherError(#[from] anyhow::Error),
}

/// A progress tracking service such as a list site
#[async_trait]
pub trait Tracker: Send + Sync {
    fn id(&self) -> i64;

    fn name(&self) -> &str;

    fn is_logged_in(&self) -> bool;

    /// Pushes the track to the remote service, returns the remote state
    async fn update(&self, track: &Track, did_read_chapter: bool) -> anyhow::Result<Track>;
}

pub struct TrackerService {
    repo: Arc<dyn TrackRepository>,
    trackers: Vec<Arc<dyn Tracker>>,
    notify: Arc<Notify>,
}

impl TrackerService {
    pub fn new(repo: Arc<dyn TrackRepository>, trackers: Vec<Arc<dyn Tracker>>) -> Self {
        Self {
            repo,
            trackers,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Signalled whenever an update is stored for a later retry
    pub fn delayed_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    fn logged_in(&self, sync_id: i64) -> Option<&Arc<dyn Tracker>> {
        self.trackers
            .iter()
            .find(|t| t.id() == sync_id && t.is_logged_in())
    }

    async fn push(&self, tracker: &dyn Tracker, track: &Track) -> Result<(), TrackerError> {
        let remote = tracker.update(track, true).await?;
        self.repo
            .upsert_track(&Track {
                id: track.id,
                manga_id: track.manga_id,
                sync_id: track.sync_id,
                ..remote
            })
            .await?;
        Ok(())
    }

    /// Updates every logged in tracker that is behind `chapter_number`.
    ///
    /// A failed update is stored and retried later when `retry_later` is set,
    /// otherwise it is only logged.
    pub async fn track_chapter(
        &self,
        manga_id: i64,
        chapter_number: f64,
        retry_later: bool,
    ) -> Result<(), TrackerError> {
        for track in self.repo.get_tracks_by_manga_id(manga_id).await? {
            let Some(tracker) = self.logged_in(track.sync_id) else {
                continue;
            };
            if track.last_chapter_read >= chapter_number {
                continue;
            }

            let updated = Track {
                last_chapter_read: chapter_number,
                ..track
            };
            if let Err(e) = self.push(tracker.as_ref(), &updated).await {
                error!(
                    "failed to update {} for manga {manga_id}: {e}",
                    tracker.name()
                );
                if retry_later {
                    self.repo
                        .insert_delayed_update(&DelayedTrackingUpdate {
                            track_id: updated.id,
                            last_chapter_read: chapter_number,
                        })
                        .await?;
                    self.notify.notify_one();
                }
            }
        }

        Ok(())
    }

    /// Retries stored updates, returns how many went through
    pub async fn retry_delayed(&self) -> Result<usize, TrackerError> {
        let mut done = 0;
        for delayed in self.repo.get_delayed_updates().await? {
            let track = match self.repo.get_track_by_id(delayed.track_id).await {
                Ok(track) => track,
                Err(RepositoryError::NotFound) => {
                    self.repo.delete_delayed_update(delayed.track_id).await?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let Some(tracker) = self.logged_in(track.sync_id) else {
                continue;
            };

            let track = Track {
                last_chapter_read: delayed.last_chapter_read,
                ..track
            };
            match self.push(tracker.as_ref(), &track).await {
                Ok(_) => {
                    self.repo.delete_delayed_update(delayed.track_id).await?;
                    done += 1;
                }
                Err(e) => warn!("delayed update of {} failed again: {e}", tracker.name()),
            }
        }

        Ok(done)
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    };

    use super::*;
    use crate::{
        domain::{entities::manga::Manga, repositories::Repositories},
        infrastructure::{
            database::establish_memory_connection, domain::repositories::repositories,
        },
    };

    struct FakeTracker {
        online: AtomicBool,
        updates: Mutex<Vec<f64>>,
    }

    #[async_trait]
    impl Tracker for FakeTracker {
        fn id(&self) -> i64 {
            1
        }

        fn name(&self) -> &str {
            "Fake"
        }

        fn is_logged_in(&self) -> bool {
            true
        }

        async fn update(&self, track: &Track, _did_read_chapter: bool) -> anyhow::Result<Track> {
            if !self.online.load(Ordering::SeqCst) {
                anyhow::bail!("offline");
            }
            self.updates.lock().unwrap().push(track.last_chapter_read);
            Ok(track.clone())
        }
    }

    async fn setup() -> (Repositories, Arc<FakeTracker>, TrackerService, i64) {
        let repos = repositories(establish_memory_connection().await.unwrap());
        let manga_id = repos
            .manga
            .insert_manga(&Manga {
                source: 1,
                url: "/manga".to_string(),
                title: "Title".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        for sync_id in [1, 2] {
            repos
                .track
                .upsert_track(&Track {
                    manga_id,
                    sync_id,
                    last_chapter_read: 3.0,
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        let tracker = Arc::new(FakeTracker {
            online: AtomicBool::new(true),
            updates: Mutex::new(vec![]),
        });
        let service = TrackerService::new(repos.track.clone(), vec![tracker.clone()]);
        (repos, tracker, service, manga_id)
    }

    #[tokio::test]
    async fn test_track_chapter_only_moves_forward() {
        let (repos, tracker, service, manga_id) = setup().await;

        service.track_chapter(manga_id, 2.0, true).await.unwrap();
        service.track_chapter(manga_id, 5.0, true).await.unwrap();

        assert_eq!(*tracker.updates.lock().unwrap(), vec![5.0]);
        let tracks = repos.track.get_tracks_by_manga_id(manga_id).await.unwrap();
        let read: Vec<(i64, f64)> = tracks
            .iter()
            .map(|t| (t.sync_id, t.last_chapter_read))
            .collect();
        // tracker 2 is not available
        assert!(read.contains(&(1, 5.0)));
        assert!(read.contains(&(2, 3.0)));
    }

    #[tokio::test]
    async fn test_failed_update_is_retried_later() {
        let (repos, tracker, service, manga_id) = setup().await;
        tracker.online.store(false, Ordering::SeqCst);

        let notify = service.delayed_notify();
        service.track_chapter(manga_id, 4.0, true).await.unwrap();
        // the permit is stored by notify_one
        notify.notified().await;
        assert_eq!(repos.track.get_delayed_updates().await.unwrap().len(), 1);

        assert_eq!(service.retry_delayed().await.unwrap(), 0);
        assert_eq!(repos.track.get_delayed_updates().await.unwrap().len(), 1);

        tracker.online.store(true, Ordering::SeqCst);
        assert_eq!(service.retry_delayed().await.unwrap(), 1);
        assert!(repos.track.get_delayed_updates().await.unwrap().is_empty());
        assert_eq!(*tracker.updates.lock().unwrap(), vec![4.0]);
    }

    #[tokio::test]
    async fn test_failed_update_without_retry() {
        let (repos, tracker, service, manga_id) = setup().await;
        tracker.online.store(false, Ordering::SeqCst);

        service.track_chapter(manga_id, 4.0, false).await.unwrap();
        assert!(repos.track.get_delayed_updates().await.unwrap().is_empty());
    }
}
