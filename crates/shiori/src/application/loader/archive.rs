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
use crate::{domain::entities::page::Page, infrastructure::archive};

/// Pages stored as entries of a zip or cbz archive, optionally encrypted
pub struct ZipPageLoader {
    path: PathBuf,
    password: Option<String>,
    recycled: AtomicBool,
}

impl ZipPageLoader {
    pub fn new(path: PathBuf, password: Option<String>) -> Self {
        Self {
            path,
            password,
            recycled: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl PageLoader for ZipPageLoader {
    fn is_local(&self) -> bool {
        true
    }

    async fn get_pages(&self) -> Result<Vec<Arc<Page>>, LoaderError> {
        ensure_active(&self.recycled)?;

        let path = self.path.clone();
        let entries = tokio::task::spawn_blocking(move || archive::image_entries(&path))
            .await
            .map_err(anyhow::Error::from)??;

        Ok(entries
            .into_iter()
            .enumerate()
            .map(|(index, name)| Arc::new(Page::ready(index, name)))
            .collect())
    }

    async fn read_page(&self, page: &Page) -> Result<Bytes, LoaderError> {
        ensure_active(&self.recycled)?;

        let name = page.location().ok_or(LoaderError::NoPages)?;
        let path = self.path.clone();
        let password = self.password.clone();
        let data = tokio::task::spawn_blocking(move || {
            archive::read_entry(&path, &name, password.as_deref())
        })
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
