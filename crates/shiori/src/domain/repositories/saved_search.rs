use async_trait::async_trait;

use super::RepositoryError;
use crate::domain::entities::saved_search::SavedSearch;

#[async_trait]
pub trait SavedSearchRepository: Send + Sync {
    async fn get_saved_searches(&self) -> Result<Vec<SavedSearch>, RepositoryError>;

    /// Returns `false` when a search with the same source and name exists
    async fn insert_saved_search(&self, search: &SavedSearch) -> Result<bool, RepositoryError>;
}
