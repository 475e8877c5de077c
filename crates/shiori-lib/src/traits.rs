use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;

use crate::{
    error::Error,
    models::{ChapterInfo, ImageResponse, PageInfo, SourceInfo},
};

pub trait Source: Send + Sync {
    fn get_source_info(&self) -> SourceInfo;

    fn id(&self) -> i64 {
        self.get_source_info().id
    }
}

/// A catalogue whose pages are served over HTTP.
///
/// Implementors only need to provide the page list; image urls default to
/// the page url and images are fetched with the source client and headers.
#[async_trait]
pub trait HttpSource: Source {
    fn client(&self) -> &reqwest::Client;

    fn headers(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    async fn get_page_list(&self, chapter: &ChapterInfo) -> Result<Vec<PageInfo>>;

    async fn get_image_url(&self, page: &PageInfo) -> Result<String> {
        Ok(page.url.clone())
    }

    async fn get_image(&self, page: &PageInfo) -> Result<ImageResponse> {
        let url = page.image_url.as_deref().ok_or(Error::MissingImageUrl)?;

        let mut req = self.client().get(url);
        for (key, value) in self.headers() {
            req = req.header(key, value);
        }

        let res = req.send().await.map_err(Error::from)?;
        if !res.status().is_success() {
            return Err(Error::BadStatus(res.status().as_u16()).into());
        }

        let content_type = res
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string);
        let data = res.bytes().await.map_err(Error::from)?;

        Ok(ImageResponse { content_type, data })
    }
}
