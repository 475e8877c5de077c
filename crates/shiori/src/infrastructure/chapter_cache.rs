use std::path::{Path, PathBuf};

use anyhow::Result;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use shiori_lib::prelude::PageInfo;

/// Disk cache shared by the reader and the downloader. Holds the page list of
/// chapters read online and the images fetched for them.
#[derive(Debug, Clone)]
pub struct ChapterCache {
    path: PathBuf,
}

fn key(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

impl ChapterCache {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn page_list_path(&self, source_id: i64, chapter_url: &str) -> PathBuf {
        self.path
            .join("pages")
            .join(key(&format!("{source_id}{chapter_url}")))
    }

    pub fn image_path(&self, image_url: &str) -> PathBuf {
        self.path.join("images").join(key(image_url))
    }

    pub async fn get_page_list(&self, source_id: i64, chapter_url: &str) -> Option<Vec<PageInfo>> {
        let data = tokio::fs::read(self.page_list_path(source_id, chapter_url))
            .await
            .ok()?;
        serde_json::from_slice(&data).ok()
    }

    pub async fn put_page_list(
        &self,
        source_id: i64,
        chapter_url: &str,
        pages: &[PageInfo],
    ) -> Result<()> {
        let path = self.page_list_path(source_id, chapter_url);
        write(&path, &serde_json::to_vec(pages)?).await
    }

    pub fn is_image_in_cache(&self, image_url: &str) -> bool {
        self.image_path(image_url).exists()
    }

    pub async fn get_image(&self, image_url: &str) -> Option<Bytes> {
        tokio::fs::read(self.image_path(image_url))
            .await
            .ok()
            .map(Bytes::from)
    }

    pub async fn put_image(&self, image_url: &str, data: &[u8]) -> Result<()> {
        write(&self.image_path(image_url), data).await
    }

    pub async fn remove_image(&self, image_url: &str) {
        let _ = tokio::fs::remove_file(self.image_path(image_url)).await;
    }

    /// Removes everything, returns the number of deleted files
    pub async fn clear(&self) -> usize {
        let mut deleted = 0;
        for dir in ["pages", "images"] {
            let Ok(mut read_dir) = tokio::fs::read_dir(self.path.join(dir)).await else {
                continue;
            };
            while let Ok(Some(entry)) = read_dir.next_entry().await {
                if tokio::fs::remove_file(entry.path()).await.is_ok() {
                    deleted += 1;
                }
            }
        }
        deleted
    }
}

async fn write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, data).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}
