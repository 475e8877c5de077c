use std::sync::Arc;

use thiserror::Error;

pub mod category;
pub mod chapter;
pub mod history;
pub mod manga;
pub mod merged;
pub mod saved_search;
pub mod track;

use category::CategoryRepository;
use chapter::ChapterRepository;
use history::HistoryRepository;
use manga::MangaRepository;
use merged::MergedRepository;
use saved_search::SavedSearchRepository;
use track::TrackRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    DbError(#[from] sqlx::Error),
    #[error("not found")]
    NotFound,
}

/// Every repository the services need, shared behind trait objects
#[derive(Clone)]
pub struct Repositories {
    pub manga: Arc<dyn MangaRepository>,
    pub chapter: Arc<dyn ChapterRepository>,
    pub category: Arc<dyn CategoryRepository>,
    pub history: Arc<dyn HistoryRepository>,
    pub track: Arc<dyn TrackRepository>,
    pub saved_search: Arc<dyn SavedSearchRepository>,
    pub merged: Arc<dyn MergedRepository>,
}
