use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;

use super::{LoaderError, PageLoader, ensure_active};
use crate::{domain::entities::page::Page, infrastructure::local::is_image};

/// Pages of a rar or cbr archive, read through libarchive
pub struct RarPageLoader {
    path: PathBuf,
    recycled: AtomicBool,
}

impl RarPageLoader {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            recycled: AtomicBool::new(false),
        }
    }
}

fn list_images(path: &Path) -> anyhow::Result<Vec<String>> {
    let mut files: Vec<String> = compress_tools::list_archive_files(File::open(path)?)?
        .into_iter()
        .filter(|name| !name.ends_with('/') && is_image(name))
        .collect();
    files.sort_by(|a, b| human_sort::compare(a, b));
    Ok(files)
}

fn read_file(path: &Path, name: &str) -> anyhow::Result<Vec<u8>> {
    let mut data = Vec::new();
    compress_tools::uncompress_archive_file(File::open(path)?, &mut data, name)?;
    Ok(data)
}

#[async_trait]
impl PageLoader for RarPageLoader {
    fn is_local(&self) -> bool {
        true
    }

    async fn get_pages(&self) -> Result<Vec<Arc<Page>>, LoaderError> {
        ensure_active(&self.recycled)?;

        let path = self.path.clone();
        let files = tokio::task::spawn_blocking(move || list_images(&path))
            .await
            .map_err(anyhow::Error::from)??;

        Ok(files
            .into_iter()
            .enumerate()
            .map(|(index, name)| Arc::new(Page::ready(index, name)))
            .collect())
    }

    async fn read_page(&self, page: &Page) -> Result<Bytes, LoaderError> {
        ensure_active(&self.recycled)?;

        let name = page.location().ok_or(LoaderError::NoPages)?;
        let path = self.path.clone();
        let data = tokio::task::spawn_blocking(move || read_file(&path, &name))
            .await
            .map_err(anyhow::Error::from)??;

        Ok(Bytes::from(data))
    }

    fn recycle(&self) {
        self.recycled.store(true, Ordering::SeqCst);
    }

    fn is_recycled(&self) -> bool {
        self.recycled.load(Ordering::SeqCst)
    }
}
