use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use bytes::Bytes;
use shiori_lib::prelude::SourceKind;
use thiserror::Error;

use crate::{
    domain::{
        entities::{manga::Manga, merged::MERGED_SOURCE_ID, page::Page},
        repositories::{RepositoryError, Repositories},
        services::download::resolve_merged_chapter,
    },
    infrastructure::{
        chapter_cache::ChapterCache,
        download_cache::DownloadCache,
        local::LocalFormat,
        sources::{SourceHandle, SourceManager},
    },
};

pub mod archive;
pub mod directory;
pub mod download;
pub mod epub;
pub mod http;
pub mod rar;
pub mod reader_chapter;

use reader_chapter::{ReaderChapter, ReaderChapterState};

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("repository error: {0}")]
    RepositoryError(#[from] RepositoryError),
    #[error("source not installed: {0}")]
    SourceNotInstalled(String),
    #[error("unsupported chapter: {0}")]
    Unsupported(String),
    #[error("no pages found")]
    NoPages,
    #[error("page loader was recycled")]
    Recycled,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("other error: {0}")]
    OtherError(#[from] anyhow::Error),
}

/// Produces the pages of one chapter
#[async_trait]
pub trait PageLoader: Send + Sync {
    /// Whether the pages are read from local storage
    fn is_local(&self) -> bool;

    async fn get_pages(&self) -> Result<Vec<Arc<Page>>, LoaderError>;

    /// Brings the page to [`PageState::Ready`](crate::domain::entities::page::PageState::Ready)
    async fn load_page(&self, _page: &Arc<Page>) -> Result<(), LoaderError> {
        Ok(())
    }

    /// Image bytes of a ready page
    async fn read_page(&self, page: &Page) -> Result<Bytes, LoaderError>;

    fn recycle(&self);

    fn is_recycled(&self) -> bool;
}

pub(crate) fn ensure_active(recycled: &AtomicBool) -> Result<(), LoaderError> {
    if recycled.load(Ordering::SeqCst) {
        Err(LoaderError::Recycled)
    } else {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoaderKind {
    Downloaded,
    Local,
    Http,
    Stub,
    Unsupported,
}

/// Picks how a chapter is loaded. For a merged manga the kind is that of
/// the source serving the chapter.
pub fn select_loader_kind(is_downloaded: bool, source_kind: SourceKind, is_merged: bool) -> LoaderKind {
    if is_merged {
        return match (is_downloaded, source_kind) {
            (true, _) => LoaderKind::Downloaded,
            (false, SourceKind::Http) => LoaderKind::Http,
            (false, SourceKind::Local) => LoaderKind::Local,
            (false, _) => LoaderKind::Unsupported,
        };
    }

    match (is_downloaded, source_kind) {
        (true, _) => LoaderKind::Downloaded,
        (false, SourceKind::Local) => LoaderKind::Local,
        (false, SourceKind::Http) => LoaderKind::Http,
        (false, SourceKind::Stub) => LoaderKind::Stub,
        (false, SourceKind::Merged) => LoaderKind::Unsupported,
    }
}

/// Loads the chapters of one manga into [`ReaderChapter`]s
pub struct ChapterLoader {
    repos: Repositories,
    sources: Arc<SourceManager>,
    cache: Arc<DownloadCache>,
    chapter_cache: ChapterCache,
    password: Option<String>,
    preserve_reading_position: bool,
    manga: Manga,
}

impl ChapterLoader {
    pub fn new(
        repos: Repositories,
        sources: Arc<SourceManager>,
        cache: Arc<DownloadCache>,
        chapter_cache: ChapterCache,
        password: Option<String>,
        preserve_reading_position: bool,
        manga: Manga,
    ) -> Self {
        Self {
            repos,
            sources,
            cache,
            chapter_cache,
            password,
            preserve_reading_position,
            manga,
        }
    }

    pub fn manga(&self) -> &Manga {
        &self.manga
    }

    /// Loads the chapter unless it is already loaded or loading.
    ///
    /// `page` is the page to open at, by default the last page read.
    pub async fn load_chapter(
        &self,
        chapter: &ReaderChapter,
        page: Option<usize>,
    ) -> Result<(), LoaderError> {
        if !chapter.try_start_loading() {
            return Ok(());
        }

        let info = chapter.chapter();
        debug!("loading pages of {}", info.name);

        match self.load(chapter).await {
            Ok((loader, pages)) => {
                if !info.read || self.preserve_reading_position || page.is_some() {
                    let requested = page.unwrap_or(info.last_page_read.max(0) as usize);
                    chapter.set_requested_page(requested.min(pages.len() - 1));
                }
                chapter.set_loader(loader);
                chapter.set_state(ReaderChapterState::Loaded(pages));
                Ok(())
            }
            Err(e) => {
                error!("failed to load {}: {e}", info.name);
                chapter.set_state(ReaderChapterState::Error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn load(
        &self,
        chapter: &ReaderChapter,
    ) -> Result<(Arc<dyn PageLoader>, Vec<Arc<Page>>), LoaderError> {
        let loader = self.get_page_loader(chapter).await?;
        let pages = loader.get_pages().await?;
        if pages.is_empty() {
            return Err(LoaderError::NoPages);
        }
        Ok((loader, pages))
    }

    async fn get_page_loader(
        &self,
        chapter: &ReaderChapter,
    ) -> Result<Arc<dyn PageLoader>, LoaderError> {
        let info = chapter.chapter();
        let is_merged = self.manga.source == MERGED_SOURCE_ID;
        let (manga, source) = if is_merged {
            resolve_merged_chapter(&self.repos, &self.sources, self.manga.id, &info)
                .await?
                .ok_or_else(|| {
                    LoaderError::Unsupported(format!("no merged reference for {}", info.name))
                })?
        } else {
            (self.manga.clone(), self.sources.get(self.manga.source))
        };

        let source_info = source.info();
        let downloaded = self
            .cache
            .provider()
            .find_chapter_dir(&source_info, &manga.title, &info);

        match select_loader_kind(downloaded.is_some(), source.kind(), is_merged) {
            LoaderKind::Downloaded => {
                let path = downloaded.ok_or_else(|| {
                    LoaderError::Unsupported(format!("{} is not downloaded", info.name))
                })?;
                Ok(Arc::new(download::DownloadPageLoader::new(
                    path,
                    self.password.clone(),
                )?))
            }
            LoaderKind::Local => {
                let SourceHandle::Local(local) = &source else {
                    return Err(LoaderError::Unsupported(source_info.name));
                };
                let loader: Arc<dyn PageLoader> = match local.get_format(&info.url)? {
                    LocalFormat::Directory(path) => {
                        Arc::new(directory::DirectoryPageLoader::new(path))
                    }
                    LocalFormat::Zip(path) => Arc::new(archive::ZipPageLoader::new(path, None)),
                    LocalFormat::Rar(path) => Arc::new(rar::RarPageLoader::new(path)),
                    LocalFormat::Epub(path) => Arc::new(epub::EpubPageLoader::new(path)),
                };
                Ok(loader)
            }
            LoaderKind::Http => {
                let http = source
                    .as_http()
                    .ok_or_else(|| LoaderError::SourceNotInstalled(source_info.name.clone()))?;
                Ok(Arc::new(http::HttpPageLoader::new(
                    http,
                    info,
                    self.chapter_cache.clone(),
                )))
            }
            LoaderKind::Stub => Err(LoaderError::SourceNotInstalled(source_info.display_name())),
            LoaderKind::Unsupported => Err(LoaderError::Unsupported(format!(
                "{} from {}",
                info.name, source_info.name
            ))),
        }
    }
}
