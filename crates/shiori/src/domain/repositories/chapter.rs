use async_trait::async_trait;

use super::RepositoryError;
use crate::domain::entities::chapter::Chapter;

#[async_trait]
pub trait ChapterRepository: Send + Sync {
    async fn get_chapter_by_id(&self, id: i64) -> Result<Chapter, RepositoryError>;

    async fn get_chapters_by_manga_id(&self, manga_id: i64)
    -> Result<Vec<Chapter>, RepositoryError>;

    async fn insert_chapter(&self, chapter: &Chapter) -> Result<i64, RepositoryError>;

    async fn update_chapter(&self, chapter: &Chapter) -> Result<(), RepositoryError>;

    async fn update_chapter_progress(
        &self,
        id: i64,
        read: bool,
        last_page_read: i64,
    ) -> Result<(), RepositoryError>;
}
