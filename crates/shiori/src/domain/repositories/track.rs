use async_trait::async_trait;

use super::RepositoryError;
use crate::domain::entities::track::{DelayedTrackingUpdate, Track};

#[async_trait]
pub trait TrackRepository: Send + Sync {
    async fn get_tracks_by_manga_id(&self, manga_id: i64) -> Result<Vec<Track>, RepositoryError>;

    async fn get_track_by_id(&self, id: i64) -> Result<Track, RepositoryError>;

    /// Inserts the track, or replaces the one with the same manga and tracker
    async fn upsert_track(&self, track: &Track) -> Result<i64, RepositoryError>;

    async fn insert_delayed_update(
        &self,
        update: &DelayedTrackingUpdate,
    ) -> Result<(), RepositoryError>;

    async fn get_delayed_updates(&self) -> Result<Vec<DelayedTrackingUpdate>, RepositoryError>;

    async fn delete_delayed_update(&self, track_id: i64) -> Result<(), RepositoryError>;
}
