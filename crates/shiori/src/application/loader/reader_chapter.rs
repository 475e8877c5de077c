use std::sync::{
    Arc, Mutex, RwLock,
    atomic::{AtomicUsize, Ordering},
};

use tokio::sync::watch;

use super::PageLoader;
use crate::domain::entities::{chapter::Chapter, page::Page};

#[derive(Debug, Clone)]
pub enum ReaderChapterState {
    Wait,
    Loading,
    Loaded(Vec<Arc<Page>>),
    Error(String),
}

/// A chapter of the reader window together with its page loader.
///
/// The loader is kept while the chapter is referenced by a window and
/// recycled once the last reference is dropped.
pub struct ReaderChapter {
    chapter: RwLock<Chapter>,
    state: watch::Sender<ReaderChapterState>,
    loader: Mutex<Option<Arc<dyn PageLoader>>>,
    requested_page: AtomicUsize,
    references: AtomicUsize,
}

impl ReaderChapter {
    pub fn new(chapter: Chapter) -> Self {
        Self {
            chapter: RwLock::new(chapter),
            state: watch::channel(ReaderChapterState::Wait).0,
            loader: Mutex::new(None),
            requested_page: AtomicUsize::new(0),
            references: AtomicUsize::new(0),
        }
    }

    pub fn chapter(&self) -> Chapter {
        self.chapter
            .read()
            .map(|chapter| chapter.clone())
            .unwrap_or_default()
    }

    pub fn id(&self) -> i64 {
        self.chapter.read().map_or(0, |chapter| chapter.id)
    }

    pub fn update_chapter(&self, f: impl FnOnce(&mut Chapter)) {
        if let Ok(mut chapter) = self.chapter.write() {
            f(&mut chapter);
        }
    }

    pub fn state(&self) -> ReaderChapterState {
        self.state.borrow().clone()
    }

    pub fn set_state(&self, state: ReaderChapterState) {
        self.state.send_replace(state);
    }

    /// Moves a chapter that is waiting or failed to `Loading`. Returns `false`
    /// when it is already loading or loaded.
    pub fn try_start_loading(&self) -> bool {
        self.state.send_if_modified(|state| {
            if matches!(state, ReaderChapterState::Wait | ReaderChapterState::Error(_)) {
                *state = ReaderChapterState::Loading;
                true
            } else {
                false
            }
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<ReaderChapterState> {
        self.state.subscribe()
    }

    pub fn pages(&self) -> Option<Vec<Arc<Page>>> {
        match &*self.state.borrow() {
            ReaderChapterState::Loaded(pages) => Some(pages.clone()),
            _ => None,
        }
    }

    pub fn loader(&self) -> Option<Arc<dyn PageLoader>> {
        self.loader.lock().ok()?.clone()
    }

    pub fn set_loader(&self, loader: Arc<dyn PageLoader>) {
        if let Ok(mut current) = self.loader.lock() {
            if let Some(old) = current.replace(loader) {
                old.recycle();
            }
        }
    }

    pub fn requested_page(&self) -> usize {
        self.requested_page.load(Ordering::SeqCst)
    }

    pub fn set_requested_page(&self, page: usize) {
        self.requested_page.store(page, Ordering::SeqCst);
    }

    pub fn references(&self) -> usize {
        self.references.load(Ordering::SeqCst)
    }

    pub fn add_ref(&self) {
        self.references.fetch_add(1, Ordering::SeqCst);
    }

    pub fn unref(&self) {
        let previous = self
            .references
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        if previous <= 1 {
            self.reset();
        }
    }

    /// Drops the loader so the chapter is loaded again next time
    pub fn reset(&self) {
        if let Ok(mut loader) = self.loader.lock() {
            if let Some(loader) = loader.take() {
                loader.recycle();
            }
        }
        self.set_state(ReaderChapterState::Wait);
    }
}
