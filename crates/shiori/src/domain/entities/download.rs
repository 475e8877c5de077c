use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use shiori_lib::prelude::HttpSource;
use tokio::sync::watch;

use super::{chapter::Chapter, manga::Manga, page::{Page, PageState}};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DownloadState {
    NotDownloaded,
    Queue,
    Downloading,
    Downloaded,
    Error,
}

/// A chapter waiting for, or going through, the download pipeline.
pub struct Download {
    pub source: Arc<dyn HttpSource>,
    pub manga: Manga,
    pub chapter: Chapter,
    state: watch::Sender<DownloadState>,
    pages: watch::Sender<Option<Vec<Arc<Page>>>>,
}

impl Download {
    pub fn new(source: Arc<dyn HttpSource>, manga: Manga, chapter: Chapter) -> Self {
        Self {
            source,
            manga,
            chapter,
            state: watch::channel(DownloadState::NotDownloaded).0,
            pages: watch::channel(None).0,
        }
    }

    pub fn state(&self) -> DownloadState {
        *self.state.borrow()
    }

    pub fn set_state(&self, state: DownloadState) {
        self.state.send_replace(state);
    }

    pub fn subscribe(&self) -> watch::Receiver<DownloadState> {
        self.state.subscribe()
    }

    pub fn pages(&self) -> Option<Vec<Arc<Page>>> {
        self.pages.borrow().clone()
    }

    pub fn set_pages(&self, pages: Option<Vec<Arc<Page>>>) {
        self.pages.send_replace(pages);
    }

    pub fn downloaded_images(&self) -> usize {
        self.pages
            .borrow()
            .as_ref()
            .map(|pages| pages.iter().filter(|p| p.state() == PageState::Ready).count())
            .unwrap_or(0)
    }

    /// Average progress of all pages, 0 when the page list is not known yet
    pub fn total_progress(&self) -> u8 {
        let pages = self.pages.borrow();
        match pages.as_ref() {
            Some(pages) if !pages.is_empty() => {
                let sum: usize = pages.iter().map(|p| p.progress() as usize).sum();
                (sum / pages.len()) as u8
            }
            _ => 0,
        }
    }
}

impl fmt::Debug for Download {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Download")
            .field("source", &self.source.id())
            .field("manga", &self.manga.title)
            .field("chapter", &self.chapter.name)
            .field("state", &self.state())
            .finish()
    }
}
