use async_trait::async_trait;

use super::RepositoryError;
use crate::domain::entities::history::History;

#[async_trait]
pub trait HistoryRepository: Send + Sync {
    async fn get_history_by_chapter_id(
        &self,
        chapter_id: i64,
    ) -> Result<Option<History>, RepositoryError>;

    async fn get_history_by_manga_id(&self, manga_id: i64)
    -> Result<Vec<History>, RepositoryError>;

    /// Inserts the entry or keeps the greatest `last_read` and `time_read`
    async fn upsert_history(&self, history: &History) -> Result<(), RepositoryError>;
}
