use std::sync::atomic::{AtomicU8, Ordering};

use shiori_lib::prelude::PageInfo;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageState {
    Queue,
    LoadPage,
    DownloadImage,
    Ready,
    Error,
}

/// One image of a chapter. State and image url are observable through
/// [`Page::subscribe`] while the downloader or a page loader works on it.
#[derive(Debug)]
pub struct Page {
    pub index: usize,
    pub url: String,
    image_url: watch::Sender<Option<String>>,
    state: watch::Sender<PageState>,
    progress: AtomicU8,
    // file path, or entry name when the page lives inside an archive
    location: watch::Sender<Option<String>>,
}

impl Page {
    pub fn new(index: usize, url: String, image_url: Option<String>) -> Self {
        Self {
            index,
            url,
            image_url: watch::channel(image_url).0,
            state: watch::channel(PageState::Queue).0,
            progress: AtomicU8::new(0),
            location: watch::channel(None).0,
        }
    }

    /// A page that is already available, e.g. a file inside a local archive
    pub fn ready(index: usize, location: String) -> Self {
        let page = Self::new(index, location.clone(), None);
        page.set_location(Some(location));
        page.set_progress(100);
        page.set_state(PageState::Ready);
        page
    }

    pub fn number(&self) -> usize {
        self.index + 1
    }

    pub fn image_url(&self) -> Option<String> {
        self.image_url.borrow().clone()
    }

    pub fn set_image_url(&self, url: Option<String>) {
        self.image_url.send_replace(url);
    }

    pub fn state(&self) -> PageState {
        *self.state.borrow()
    }

    pub fn set_state(&self, state: PageState) {
        self.state.send_replace(state);
    }

    pub fn subscribe(&self) -> watch::Receiver<PageState> {
        self.state.subscribe()
    }

    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::Relaxed)
    }

    pub fn set_progress(&self, progress: u8) {
        self.progress.store(progress.min(100), Ordering::Relaxed);
    }

    pub fn location(&self) -> Option<String> {
        self.location.borrow().clone()
    }

    pub fn set_location(&self, location: Option<String>) {
        self.location.send_replace(location);
    }

    pub fn to_page_info(&self) -> PageInfo {
        PageInfo {
            index: self.index,
            url: self.url.clone(),
            image_url: self.image_url(),
        }
    }
}
