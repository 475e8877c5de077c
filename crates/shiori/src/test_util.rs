use std::{
    collections::HashMap,
    io::Cursor,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use shiori_lib::prelude::{
    ChapterInfo, HttpSource, ImageResponse, PageInfo, Source, SourceInfo, SourceKind,
};
use tokio::sync::Semaphore;

pub fn png(width: u32, height: u32) -> Bytes {
    let mut buf = Cursor::new(Vec::new());
    image::RgbImage::new(width, height)
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    Bytes::from(buf.into_inner())
}

/// Source serving `pages` small png pages for every chapter
pub struct FakeSource {
    pub id: i64,
    pub pages: usize,
    pub image: Bytes,
    pub content_type: Option<String>,
    // page index -> number of failures before it succeeds
    pub failures: HashMap<usize, usize>,
    pub attempts: Mutex<HashMap<usize, usize>>,
    pub page_list_calls: AtomicUsize,
    /// image requests wait for a permit when set
    pub gate: Option<Arc<Semaphore>>,
    client: reqwest::Client,
}

impl FakeSource {
    pub fn new(id: i64, pages: usize) -> Self {
        Self {
            id,
            pages,
            image: png(4, 4),
            content_type: Some("image/png".to_string()),
            failures: HashMap::new(),
            attempts: Mutex::new(HashMap::new()),
            page_list_calls: AtomicUsize::new(0),
            gate: None,
            client: reqwest::Client::new(),
        }
    }
}

impl Source for FakeSource {
    fn get_source_info(&self) -> SourceInfo {
        SourceInfo {
            id: self.id,
            name: format!("Source {}", self.id),
            lang: "en".to_string(),
            kind: SourceKind::Http,
        }
    }
}

#[async_trait]
impl HttpSource for FakeSource {
    fn client(&self) -> &reqwest::Client {
        &self.client
    }

    async fn get_page_list(&self, chapter: &ChapterInfo) -> anyhow::Result<Vec<PageInfo>> {
        self.page_list_calls.fetch_add(1, Ordering::SeqCst);
        Ok((0..self.pages)
            .map(|index| PageInfo {
                index,
                url: format!("https://example.org{}/{index}", chapter.url),
                image_url: None,
            })
            .collect())
    }

    async fn get_image_url(&self, page: &PageInfo) -> anyhow::Result<String> {
        Ok(format!("{}.png", page.url))
    }

    async fn get_image(&self, page: &PageInfo) -> anyhow::Result<ImageResponse> {
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await?;
        }
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let attempt = attempts.entry(page.index).or_default();
            *attempt += 1;
            *attempt
        };
        if attempt <= self.failures.get(&page.index).copied().unwrap_or(0) {
            anyhow::bail!("connection reset");
        }
        Ok(ImageResponse {
            content_type: self.content_type.clone(),
            data: self.image.clone(),
        })
    }
}
