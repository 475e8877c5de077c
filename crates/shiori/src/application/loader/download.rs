use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;

use super::{LoaderError, PageLoader, archive::ZipPageLoader, directory::DirectoryPageLoader};
use crate::{domain::entities::page::Page, infrastructure::archive::is_encrypted};

/// Pages of a downloaded chapter, either a directory or a cbz archive
pub struct DownloadPageLoader {
    inner: Box<dyn PageLoader>,
}

impl DownloadPageLoader {
    pub fn new(path: PathBuf, password: Option<String>) -> Result<Self, LoaderError> {
        let inner: Box<dyn PageLoader> = if path.is_dir() {
            Box::new(DirectoryPageLoader::new(path))
        } else {
            if password.is_none() && is_encrypted(&path)? {
                return Err(LoaderError::Unsupported(format!(
                    "{} is encrypted but no password is set",
                    path.display()
                )));
            }
            Box::new(ZipPageLoader::new(path, password))
        };
        Ok(Self { inner })
    }
}

#[async_trait]
impl PageLoader for DownloadPageLoader {
    fn is_local(&self) -> bool {
        true
    }

    async fn get_pages(&self) -> Result<Vec<Arc<Page>>, LoaderError> {
        self.inner.get_pages().await
    }

    async fn read_page(&self, page: &Page) -> Result<Bytes, LoaderError> {
        self.inner.read_page(page).await
    }

    fn recycle(&self) {
        self.inner.recycle()
    }

    fn is_recycled(&self) -> bool {
        self.inner.is_recycled()
    }
}
