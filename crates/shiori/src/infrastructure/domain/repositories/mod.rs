use std::sync::Arc;

use crate::{domain::repositories::Repositories, infrastructure::database::Pool};

pub mod category;
pub mod chapter;
pub mod history;
pub mod manga;
pub mod merged;
pub mod saved_search;
pub mod track;

pub fn repositories(pool: Pool) -> Repositories {
    Repositories {
        manga: Arc::new(manga::MangaRepositoryImpl::new(pool.clone())),
        chapter: Arc::new(chapter::ChapterRepositoryImpl::new(pool.clone())),
        category: Arc::new(category::CategoryRepositoryImpl::new(pool.clone())),
        history: Arc::new(history::HistoryRepositoryImpl::new(pool.clone())),
        track: Arc::new(track::TrackRepositoryImpl::new(pool.clone())),
        saved_search: Arc::new(saved_search::SavedSearchRepositoryImpl::new(pool.clone())),
        merged: Arc::new(merged::MergedRepositoryImpl::new(pool)),
    }
}
