use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use shiori_lib::prelude::HttpSource;
use tokio::task::JoinSet;

use super::{LoaderError, PageLoader, ensure_active};
use crate::{
    domain::entities::{
        chapter::Chapter,
        page::{Page, PageState},
    },
    infrastructure::chapter_cache::ChapterCache,
};

/// Pages fetched after the one being loaded
const PRELOAD_PAGES: usize = 4;

/// Pages of a chapter read online. Page lists and images go through the
/// chapter cache so a chapter is only fetched once.
pub struct HttpPageLoader {
    source: Arc<dyn HttpSource>,
    chapter: Chapter,
    cache: ChapterCache,
    pages: Mutex<Vec<Arc<Page>>>,
    preloads: Mutex<JoinSet<()>>,
    recycled: Arc<AtomicBool>,
}

impl HttpPageLoader {
    pub fn new(source: Arc<dyn HttpSource>, chapter: Chapter, cache: ChapterCache) -> Self {
        Self {
            source,
            chapter,
            cache,
            pages: Mutex::new(vec![]),
            preloads: Mutex::new(JoinSet::new()),
            recycled: Arc::new(AtomicBool::new(false)),
        }
    }

    fn preload_after(&self, page: &Page) {
        let next: Vec<Arc<Page>> = match self.pages.lock() {
            Ok(pages) => pages
                .iter()
                .skip(page.index + 1)
                .take(PRELOAD_PAGES)
                .filter(|p| p.state() == PageState::Queue)
                .cloned()
                .collect(),
            Err(_) => return,
        };
        let Ok(mut preloads) = self.preloads.lock() else {
            return;
        };
        for page in next {
            // claimed here so a page is never preloaded twice
            page.set_state(PageState::LoadPage);
            let source = self.source.clone();
            let cache = self.cache.clone();
            let recycled = self.recycled.clone();
            preloads.spawn(async move {
                if recycled.load(Ordering::SeqCst) {
                    return;
                }
                if let Err(e) = fetch_page(source.as_ref(), &cache, &page).await {
                    debug!("failed to preload page {}: {e}", page.number());
                }
            });
        }
    }
}

async fn fetch_page(
    source: &dyn HttpSource,
    cache: &ChapterCache,
    page: &Page,
) -> anyhow::Result<()> {
    let result = async {
        if page.image_url().is_none() {
            page.set_state(PageState::LoadPage);
            let url = source.get_image_url(&page.to_page_info()).await?;
            page.set_image_url(Some(url));
        }
        let image_url = page
            .image_url()
            .ok_or_else(|| anyhow!("page {} has no image url", page.number()))?;

        if !cache.is_image_in_cache(&image_url) {
            page.set_state(PageState::DownloadImage);
            page.set_progress(0);
            let response = source.get_image(&page.to_page_info()).await?;
            cache.put_image(&image_url, &response.data).await?;
        }

        page.set_location(Some(cache.image_path(&image_url).display().to_string()));
        page.set_progress(100);
        page.set_state(PageState::Ready);
        anyhow::Ok(())
    }
    .await;

    if result.is_err() {
        page.set_progress(0);
        page.set_state(PageState::Error);
    }
    result
}

#[async_trait]
impl PageLoader for HttpPageLoader {
    fn is_local(&self) -> bool {
        false
    }

    async fn get_pages(&self) -> Result<Vec<Arc<Page>>, LoaderError> {
        ensure_active(&self.recycled)?;

        let source_id = self.source.get_source_info().id;
        let list = match self.cache.get_page_list(source_id, &self.chapter.url).await {
            Some(list) => list,
            None => {
                let list = self
                    .source
                    .get_page_list(&self.chapter.to_chapter_info())
                    .await?;
                if let Err(e) = self
                    .cache
                    .put_page_list(source_id, &self.chapter.url, &list)
                    .await
                {
                    warn!("failed to cache page list of {}: {e}", self.chapter.name);
                }
                list
            }
        };

        let pages: Vec<Arc<Page>> = list
            .into_iter()
            .enumerate()
            .map(|(index, page)| Arc::new(Page::new(index, page.url, page.image_url)))
            .collect();
        if let Ok(mut current) = self.pages.lock() {
            *current = pages.clone();
        }

        Ok(pages)
    }

    async fn load_page(&self, page: &Arc<Page>) -> Result<(), LoaderError> {
        ensure_active(&self.recycled)?;

        if page.state() != PageState::Ready {
            fetch_page(self.source.as_ref(), &self.cache, page).await?;
        }
        self.preload_after(page);

        Ok(())
    }

    async fn read_page(&self, page: &Page) -> Result<Bytes, LoaderError> {
        ensure_active(&self.recycled)?;

        let image_url = page.image_url().ok_or(LoaderError::NoPages)?;
        self.cache
            .get_image(&image_url)
            .await
            .ok_or_else(|| anyhow!("page {} is not loaded", page.number()).into())
    }

    fn recycle(&self) {
        self.recycled.store(true, Ordering::SeqCst);
        if let Ok(mut preloads) = self.preloads.lock() {
            preloads.abort_all();
        }
    }

    fn is_recycled(&self) -> bool {
        self.recycled.load(Ordering::SeqCst)
    }
}
