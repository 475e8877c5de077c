use async_trait::async_trait;

use super::RepositoryError;
use crate::domain::entities::category::Category;

#[async_trait]
pub trait CategoryRepository: Send + Sync {
    async fn get_categories(&self) -> Result<Vec<Category>, RepositoryError>;

    async fn insert_category(&self, category: &Category) -> Result<i64, RepositoryError>;

    async fn get_categories_by_manga_id(
        &self,
        manga_id: i64,
    ) -> Result<Vec<Category>, RepositoryError>;

    /// Adds the manga to the categories, existing links are kept
    async fn add_manga_to_categories(
        &self,
        manga_id: i64,
        category_ids: &[i64],
    ) -> Result<(), RepositoryError>;
}
