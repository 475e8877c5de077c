use async_trait::async_trait;

use super::RepositoryError;
use crate::domain::entities::merged::MergedMangaReference;

#[async_trait]
pub trait MergedRepository: Send + Sync {
    async fn get_references_by_merge_id(
        &self,
        merge_id: i64,
    ) -> Result<Vec<MergedMangaReference>, RepositoryError>;

    /// Inserts the reference unless one with the same merge url, manga url
    /// and source exists. Returns `false` when nothing was inserted.
    async fn insert_reference(
        &self,
        reference: &MergedMangaReference,
    ) -> Result<bool, RepositoryError>;
}
