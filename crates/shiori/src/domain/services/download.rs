use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use itertools::Itertools;
use shiori_lib::prelude::{HttpSource, SourceInfo};
use thiserror::Error;

use crate::{
    application::worker::downloads::Downloader,
    domain::{
        entities::{
            chapter::Chapter, download::Download, manga::Manga, merged::MERGED_SOURCE_ID,
        },
        repositories::{RepositoryError, Repositories},
    },
    infrastructure::{
        download_cache::DownloadCache,
        sources::{SourceHandle, SourceManager},
    },
};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("repository error: {0}")]
    RepositoryError(#[from] RepositoryError),
    #[error("source {0} is not installed")]
    SourceNotInstalled(i64),
    #[error("other error: {0}")]
    OtherError(#[from] anyhow::Error),
}

/// Resolves the manga and source actually serving a chapter of a merged
/// manga. Chapters of a merged manga belong to one of the merged entries.
pub async fn resolve_merged_chapter(
    repos: &Repositories,
    sources: &SourceManager,
    merge_id: i64,
    chapter: &Chapter,
) -> Result<Option<(Manga, SourceHandle)>, RepositoryError> {
    let references = repos.merged.get_references_by_merge_id(merge_id).await?;
    let Some(reference) = references
        .into_iter()
        .find(|r| r.manga_id == Some(chapter.manga_id))
    else {
        return Ok(None);
    };

    let manga = repos.manga.get_manga_by_id(chapter.manga_id).await?;
    Ok(Some((manga, sources.get(reference.manga_source))))
}

pub struct DownloadService {
    repos: Repositories,
    sources: Arc<SourceManager>,
    cache: Arc<DownloadCache>,
    downloader: Downloader,
    pending_deletions: Mutex<HashMap<i64, (Manga, Vec<Chapter>)>>,
}

impl DownloadService {
    pub fn new(
        repos: Repositories,
        sources: Arc<SourceManager>,
        cache: Arc<DownloadCache>,
        downloader: Downloader,
    ) -> Self {
        Self {
            repos,
            sources,
            cache,
            downloader,
            pending_deletions: Mutex::new(HashMap::new()),
        }
    }

    pub fn downloader(&self) -> &Downloader {
        &self.downloader
    }

    pub fn cache(&self) -> &DownloadCache {
        &self.cache
    }

    /// Splits chapters of a manga by the manga and source they are
    /// downloaded from, merged manga fan out to their entries
    async fn resolve(
        &self,
        manga: &Manga,
        chapters: Vec<Chapter>,
    ) -> Result<Vec<(Manga, SourceHandle, Vec<Chapter>)>, DownloadError> {
        if manga.source != MERGED_SOURCE_ID {
            return Ok(vec![(manga.clone(), self.sources.get(manga.source), chapters)]);
        }

        let references = self.repos.merged.get_references_by_merge_id(manga.id).await?;
        let mut resolved = vec![];
        for (manga_id, chapters) in chapters.into_iter().into_group_map_by(|c| c.manga_id) {
            let Some(reference) = references.iter().find(|r| r.manga_id == Some(manga_id)) else {
                warn!("no merged reference for manga {manga_id} in {}", manga.title);
                continue;
            };
            if !reference.download_chapters {
                debug!("downloads disabled for {}", reference.manga_url);
                continue;
            }
            let underlying = self.repos.manga.get_manga_by_id(manga_id).await?;
            resolved.push((underlying, self.sources.get(reference.manga_source), chapters));
        }

        Ok(resolved)
    }

    pub async fn download_chapters(
        &self,
        manga: &Manga,
        chapters: Vec<Chapter>,
        auto_start: bool,
    ) -> Result<(), DownloadError> {
        for (manga, source, chapters) in self.resolve(manga, chapters).await? {
            let source = source
                .as_http()
                .ok_or(DownloadError::SourceNotInstalled(manga.source))?;
            self.downloader
                .queue_chapters(source, &manga, chapters, auto_start);
        }

        Ok(())
    }

    pub async fn is_chapter_downloaded(
        &self,
        manga: &Manga,
        chapter: &Chapter,
        skip_cache: bool,
    ) -> Result<bool, DownloadError> {
        let (manga, source) = if manga.source == MERGED_SOURCE_ID {
            match resolve_merged_chapter(&self.repos, &self.sources, manga.id, chapter).await? {
                Some(resolved) => resolved,
                None => return Ok(false),
            }
        } else {
            (manga.clone(), self.sources.get(manga.source))
        };

        Ok(self.is_downloaded_from(&source.info(), &manga.title, chapter, skip_cache))
    }

    pub fn is_downloaded_from(
        &self,
        source: &SourceInfo,
        manga_title: &str,
        chapter: &Chapter,
        skip_cache: bool,
    ) -> bool {
        self.cache
            .is_chapter_downloaded(source, manga_title, chapter, skip_cache)
    }

    /// Removes the chapters from the queue and from disk
    pub async fn delete_chapters(
        &self,
        manga: &Manga,
        chapters: Vec<Chapter>,
    ) -> Result<usize, DownloadError> {
        let ids: Vec<i64> = chapters.iter().map(|c| c.id).collect();
        self.downloader.remove_from_queue(&ids);

        let mut deleted = 0;
        for (manga, source, chapters) in self.resolve(manga, chapters).await? {
            let info = source.info();
            deleted += self
                .cache
                .provider()
                .delete_chapters(&info, &manga.title, &chapters)
                .len();
            self.cache.remove_chapters(&info, &manga.title, &chapters);
        }
        info!("deleted {deleted} chapters of {}", manga.title);

        Ok(deleted)
    }

    /// Schedules chapters for deletion, see [`DownloadService::delete_pending`]
    pub fn enqueue_chapters_to_delete(&self, manga: &Manga, chapters: Vec<Chapter>) {
        let Ok(mut pending) = self.pending_deletions.lock() else {
            return;
        };
        let entry = pending
            .entry(manga.id)
            .or_insert_with(|| (manga.clone(), vec![]));
        for chapter in chapters {
            if !entry.1.iter().any(|c| c.id == chapter.id) {
                entry.1.push(chapter);
            }
        }
    }

    pub async fn delete_pending(&self) -> Result<usize, DownloadError> {
        let pending: Vec<(Manga, Vec<Chapter>)> = match self.pending_deletions.lock() {
            Ok(mut pending) => pending.drain().map(|(_, v)| v).collect(),
            Err(_) => return Ok(0),
        };

        let mut deleted = 0;
        for (manga, chapters) in pending {
            deleted += self.delete_chapters(&manga, chapters).await?;
        }
        Ok(deleted)
    }

    pub fn cancel_queued_downloads(&self, chapter_ids: &[i64]) -> Vec<Arc<Download>> {
        self.downloader.cancel_queued(chapter_ids)
    }

    pub fn add_downloads_to_start_of_queue(&self, downloads: Vec<Arc<Download>>) {
        self.downloader.add_downloads_to_start_of_queue(downloads);
    }

    /// Rebuilds the queue from the crash-recovery store. Entries whose
    /// chapter, manga or source disappeared are dropped.
    pub async fn restore_queue(&self) -> Result<usize, DownloadError> {
        let objects = self.downloader.store().restore();
        if objects.is_empty() {
            return Ok(0);
        }

        let mut manga_cache: HashMap<i64, (Manga, Option<Arc<dyn HttpSource>>)> = HashMap::new();
        let mut downloads = vec![];
        for object in objects {
            if !manga_cache.contains_key(&object.manga_id) {
                match self.repos.manga.get_manga_by_id(object.manga_id).await {
                    Ok(manga) => {
                        let source = self.sources.get_http(manga.source);
                        manga_cache.insert(object.manga_id, (manga, source));
                    }
                    Err(RepositoryError::NotFound) => continue,
                    Err(e) => return Err(e.into()),
                }
            }
            let Some((manga, Some(source))) = manga_cache.get(&object.manga_id) else {
                continue;
            };
            let chapter = match self.repos.chapter.get_chapter_by_id(object.chapter_id).await {
                Ok(chapter) => chapter,
                Err(RepositoryError::NotFound) => continue,
                Err(e) => return Err(e.into()),
            };
            downloads.push(Arc::new(Download::new(source.clone(), manga.clone(), chapter)));
        }

        let restored = self.downloader.restore(downloads);
        info!("restored {restored} downloads");
        Ok(restored)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        application::worker::downloads::DownloaderOptions,
        domain::entities::{download::DownloadState, merged::MergedMangaReference},
        infrastructure::{
            chapter_cache::ChapterCache, database::establish_memory_connection,
            domain::repositories::repositories, download_provider::DownloadProvider,
            download_store::DownloadStore, local::LocalSource,
        },
        test_util::FakeSource,
    };

    struct Fixture {
        _dir: tempfile::TempDir,
        repos: Repositories,
        service: DownloadService,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let repos = repositories(establish_memory_connection().await.unwrap());
        let sources = Arc::new(SourceManager::new(LocalSource::new(dir.path().join("local"))));
        sources.install(Arc::new(FakeSource::new(1, 1)));
        sources.install(Arc::new(FakeSource::new(2, 1)));

        let cache = Arc::new(DownloadCache::new(DownloadProvider::new(
            dir.path().join("downloads"),
        )));
        let downloader = Downloader::new(
            cache.clone(),
            ChapterCache::new(dir.path().join("cache")),
            DownloadStore::open(dir.path().join("downloads.json")),
            DownloaderOptions::default(),
        );
        let service = DownloadService::new(repos.clone(), sources, cache, downloader);

        Fixture {
            _dir: dir,
            repos,
            service,
        }
    }

    async fn insert_manga(repos: &Repositories, source: i64, title: &str) -> Manga {
        let mut manga = Manga {
            source,
            url: format!("/manga/{title}"),
            title: title.to_string(),
            favorite: true,
            ..Default::default()
        };
        manga.id = repos.manga.insert_manga(&manga).await.unwrap();
        manga
    }

    async fn insert_chapter(repos: &Repositories, manga_id: i64, name: &str) -> Chapter {
        let mut chapter = Chapter {
            manga_id,
            url: format!("/chapter/{manga_id}/{name}"),
            name: name.to_string(),
            ..Default::default()
        };
        chapter.id = repos.chapter.insert_chapter(&chapter).await.unwrap();
        chapter
    }

    #[tokio::test]
    async fn test_merged_chapters_are_queued_against_their_source() {
        let f = fixture().await;
        let merged = insert_manga(&f.repos, MERGED_SOURCE_ID, "Merged").await;
        let first = insert_manga(&f.repos, 1, "First").await;
        let second = insert_manga(&f.repos, 2, "Second").await;
        for (manga, download) in [(&first, true), (&second, false)] {
            f.repos
                .merged
                .insert_reference(&MergedMangaReference {
                    download_chapters: download,
                    merge_id: merged.id,
                    merge_url: merged.url.clone(),
                    manga_id: Some(manga.id),
                    manga_url: manga.url.clone(),
                    manga_source: manga.source,
                    ..Default::default()
                })
                .await
                .unwrap();
        }
        let a = insert_chapter(&f.repos, first.id, "A").await;
        let b = insert_chapter(&f.repos, second.id, "B").await;

        f.service
            .download_chapters(&merged, vec![a.clone(), b], false)
            .await
            .unwrap();

        let queue = f.service.downloader().queue();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].chapter.id, a.id);
        assert_eq!(queue[0].manga.id, first.id);
        assert_eq!(queue[0].source.id(), 1);
    }

    #[tokio::test]
    async fn test_uninstalled_source() {
        let f = fixture().await;
        let manga = insert_manga(&f.repos, 99, "Missing").await;
        let chapter = insert_chapter(&f.repos, manga.id, "A").await;

        let res = f.service.download_chapters(&manga, vec![chapter], false).await;
        assert!(matches!(res, Err(DownloadError::SourceNotInstalled(99))));
    }

    #[tokio::test]
    async fn test_restore_queue_drops_missing_entries() {
        let f = fixture().await;
        let manga = insert_manga(&f.repos, 1, "Title").await;
        let a = insert_chapter(&f.repos, manga.id, "A").await;
        let b = insert_chapter(&f.repos, manga.id, "B").await;
        f.service
            .downloader()
            .store()
            .add_all(&[(manga.id, b.id), (manga.id, 1000), (2000, 1001), (manga.id, a.id)]);

        assert_eq!(f.service.restore_queue().await.unwrap(), 2);

        let queue = f.service.downloader().queue();
        let ids: Vec<i64> = queue.iter().map(|d| d.chapter.id).collect();
        assert_eq!(ids, vec![b.id, a.id]);
        assert!(queue.iter().all(|d| d.state() == DownloadState::Queue));
        assert_eq!(f.service.downloader().store().len(), 2);
    }

    #[tokio::test]
    async fn test_pending_deletions() {
        let f = fixture().await;
        let manga = insert_manga(&f.repos, 1, "Title").await;
        let a = insert_chapter(&f.repos, manga.id, "A").await;
        let info = f.service.sources.get(1).info();
        let dir = f
            .service
            .cache()
            .provider()
            .get_or_create_manga_dir(&info, "Title")
            .unwrap();
        std::fs::write(dir.join("A.cbz"), b"zip").unwrap();
        assert!(f.service.is_chapter_downloaded(&manga, &a, true).await.unwrap());

        f.service.enqueue_chapters_to_delete(&manga, vec![a.clone()]);
        f.service.enqueue_chapters_to_delete(&manga, vec![a.clone()]);
        assert!(dir.join("A.cbz").exists());

        assert_eq!(f.service.delete_pending().await.unwrap(), 1);
        assert!(!f.service.is_chapter_downloaded(&manga, &a, true).await.unwrap());
        assert_eq!(f.service.delete_pending().await.unwrap(), 0);
    }
}
