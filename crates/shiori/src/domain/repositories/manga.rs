use async_trait::async_trait;

use super::RepositoryError;
use crate::domain::entities::manga::{CustomMangaInfo, Manga};

#[async_trait]
pub trait MangaRepository: Send + Sync {
    async fn get_manga_by_id(&self, id: i64) -> Result<Manga, RepositoryError>;

    async fn get_manga_by_source_url(
        &self,
        source: i64,
        url: &str,
    ) -> Result<Option<Manga>, RepositoryError>;

    async fn get_favorites(&self) -> Result<Vec<Manga>, RepositoryError>;

    /// Manga outside of the library that have at least one read chapter
    async fn get_read_non_favorites(&self) -> Result<Vec<Manga>, RepositoryError>;

    async fn insert_manga(&self, manga: &Manga) -> Result<i64, RepositoryError>;

    async fn update_manga(&self, manga: &Manga) -> Result<(), RepositoryError>;

    async fn set_favorite(&self, id: i64, favorite: bool) -> Result<(), RepositoryError>;

    async fn get_custom_info(
        &self,
        manga_id: i64,
    ) -> Result<Option<CustomMangaInfo>, RepositoryError>;

    async fn set_custom_info(&self, info: &CustomMangaInfo) -> Result<(), RepositoryError>;
}
