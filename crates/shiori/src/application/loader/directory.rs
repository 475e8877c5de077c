use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;

use super::{LoaderError, PageLoader, ensure_active};
use crate::{
    domain::entities::page::Page,
    infrastructure::local::{is_image, sort_dir},
};

/// Pages stored as image files of a directory
pub struct DirectoryPageLoader {
    dir: PathBuf,
    recycled: AtomicBool,
}

impl DirectoryPageLoader {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            recycled: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl PageLoader for DirectoryPageLoader {
    fn is_local(&self) -> bool {
        true
    }

    async fn get_pages(&self) -> Result<Vec<Arc<Page>>, LoaderError> {
        ensure_active(&self.recycled)?;

        let pages = sort_dir(self.dir.read_dir()?)
            .into_iter()
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_image(&path.to_string_lossy()))
            .enumerate()
            .map(|(index, path)| Arc::new(Page::ready(index, path.display().to_string())))
            .collect();

        Ok(pages)
    }

    async fn read_page(&self, page: &Page) -> Result<Bytes, LoaderError> {
        ensure_active(&self.recycled)?;
        let location = page.location().ok_or(LoaderError::NoPages)?;
        Ok(Bytes::from(tokio::fs::read(location).await?))
    }

    fn recycle(&self) {
        self.recycled.store(true, Ordering::SeqCst);
    }

    fn is_recycled(&self) -> bool {
        self.recycled.load(Ordering::SeqCst)
    }
}
