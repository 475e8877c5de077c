use thiserror::Error;

use crate::{
    application::worker::downloads::Downloader,
    domain::{
        entities::{manga::Manga, merged::MERGED_SOURCE_ID},
        repositories::{RepositoryError, Repositories},
    },
};

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("repository error: {0}")]
    RepositoryError(#[from] RepositoryError),
}

pub struct LibraryService {
    repos: Repositories,
    downloader: Downloader,
}

impl LibraryService {
    pub fn new(repos: Repositories, downloader: Downloader) -> Self {
        Self { repos, downloader }
    }

    pub async fn get_library(&self) -> Result<Vec<Manga>, LibraryError> {
        Ok(self.repos.manga.get_favorites().await?)
    }

    pub async fn add_to_library(
        &self,
        manga_id: i64,
        category_ids: &[i64],
    ) -> Result<(), LibraryError> {
        self.repos.manga.set_favorite(manga_id, true).await?;
        if !category_ids.is_empty() {
            self.repos
                .category
                .add_manga_to_categories(manga_id, category_ids)
                .await?;
        }

        Ok(())
    }

    /// Clears the favorite flag and drops every queued download of the manga,
    /// including those of the entries of a merged manga
    pub async fn remove_from_library(&self, manga_id: i64) -> Result<(), LibraryError> {
        let manga = self.repos.manga.get_manga_by_id(manga_id).await?;
        self.repos.manga.set_favorite(manga_id, false).await?;

        let mut removed = self.downloader.remove_from_queue_by_manga(manga_id).len();
        if manga.source == MERGED_SOURCE_ID {
            for reference in self.repos.merged.get_references_by_merge_id(manga_id).await? {
                if let Some(id) = reference.manga_id.filter(|id| *id != manga_id) {
                    removed += self.downloader.remove_from_queue_by_manga(id).len();
                }
            }
        }
        if removed > 0 {
            info!("removed {removed} queued downloads of {}", manga.title);
        }

        Ok(())
    }
}
