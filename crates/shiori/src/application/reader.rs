use std::{
    collections::HashSet,
    iter,
    sync::{Arc, Mutex},
    time::Instant,
};

use thiserror::Error;
use tokio::task::JoinSet;

use crate::{
    application::loader::{
        ChapterLoader, LoaderError,
        reader_chapter::{ReaderChapter, ReaderChapterState},
    },
    domain::{
        entities::{
            chapter::Chapter,
            download::Download,
            history::History,
            manga::{Manga, TriState},
            merged::MERGED_SOURCE_ID,
            page::PageState,
        },
        repositories::{RepositoryError, Repositories},
        services::{
            download::{DownloadError, DownloadService},
            tracker::TrackerService,
        },
    },
    infrastructure::{config::ReaderConfig, local::LOCAL_SOURCE_ID},
};

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("repository error: {0}")]
    RepositoryError(#[from] RepositoryError),
    #[error("loader error: {0}")]
    LoaderError(#[from] LoaderError),
    #[error("download error: {0}")]
    DownloadError(#[from] DownloadError),
    #[error("chapter {0} is not in the reader list")]
    ChapterNotFound(i64),
}

/// Share of a chapter read before the following chapters are downloaded
const DOWNLOAD_AHEAD_THRESHOLD: f64 = 0.25;

/// The chapter being read and its neighbours in reading order
#[derive(Clone)]
pub struct ViewerChapters {
    pub prev: Option<Arc<ReaderChapter>>,
    pub curr: Arc<ReaderChapter>,
    pub next: Option<Arc<ReaderChapter>>,
}

impl ViewerChapters {
    fn iter(&self) -> impl Iterator<Item = &Arc<ReaderChapter>> {
        self.prev
            .iter()
            .chain(iter::once(&self.curr))
            .chain(self.next.iter())
    }

    fn add_ref(&self) {
        self.iter().for_each(|c| c.add_ref());
    }

    fn unref(&self) {
        self.iter().for_each(|c| c.unref());
    }
}

fn tri_state_matches(state: TriState, value: bool) -> bool {
    match state {
        TriState::Disabled => true,
        TriState::EnabledIs => value,
        TriState::EnabledNot => !value,
    }
}

/// Chapters the reader moves through, in reading order. The chapter being
/// opened is always part of the list.
pub fn reader_chapters(
    manga: &Manga,
    chapters: Vec<Chapter>,
    current_id: i64,
    options: &ReaderConfig,
    downloaded: &HashSet<i64>,
) -> Vec<Chapter> {
    let flags = manga.chapter_flags;
    let mut chapters: Vec<Chapter> = chapters
        .into_iter()
        .filter(|c| {
            if c.id == current_id {
                return true;
            }
            if manga.is_scanlator_excluded(c) {
                return false;
            }
            if options.skip_read && c.read {
                return false;
            }
            !options.skip_filtered
                || (tri_state_matches(flags.unread_filter(), !c.read)
                    && tri_state_matches(flags.downloaded_filter(), downloaded.contains(&c.id))
                    && tri_state_matches(flags.bookmarked_filter(), c.bookmark))
        })
        .collect();
    manga.sort_chapters(&mut chapters, false);
    chapters
}

/// State of one reading session of a manga.
///
/// Side effects of page turns (progress, tracking, deletions, downloading
/// ahead) run as background tasks that are aborted when the session closes.
pub struct ReaderSession {
    repos: Repositories,
    loader: ChapterLoader,
    downloads: Arc<DownloadService>,
    tracker: Option<Arc<TrackerService>>,
    options: ReaderConfig,
    chapters: Vec<Arc<ReaderChapter>>,
    window: Mutex<Option<ViewerChapters>>,
    canceled_downloads: Mutex<Vec<Arc<Download>>>,
    downloaded_ahead: Mutex<HashSet<i64>>,
    read_start: Mutex<Instant>,
    tasks: Mutex<JoinSet<()>>,
}

async fn manga_chapters(repos: &Repositories, manga: &Manga) -> Result<Vec<Chapter>, RepositoryError> {
    if manga.source != MERGED_SOURCE_ID {
        return repos.chapter.get_chapters_by_manga_id(manga.id).await;
    }

    let mut chapters = vec![];
    for reference in repos.merged.get_references_by_merge_id(manga.id).await? {
        if let Some(manga_id) = reference.manga_id {
            chapters.extend(repos.chapter.get_chapters_by_manga_id(manga_id).await?);
        }
    }
    Ok(chapters)
}

impl ReaderSession {
    /// Opens the manga of `loader` at `chapter_id`
    pub async fn open(
        loader: ChapterLoader,
        repos: Repositories,
        downloads: Arc<DownloadService>,
        tracker: Option<Arc<TrackerService>>,
        options: ReaderConfig,
        chapter_id: i64,
        page: Option<usize>,
    ) -> Result<Self, ReaderError> {
        let manga = loader.manga().clone();
        let chapters = manga_chapters(&repos, &manga).await?;

        let mut downloaded = HashSet::new();
        if options.skip_filtered && manga.chapter_flags.downloaded_filter() != TriState::Disabled {
            for chapter in &chapters {
                if downloads.is_chapter_downloaded(&manga, chapter, false).await? {
                    downloaded.insert(chapter.id);
                }
            }
        }

        let chapters = reader_chapters(&manga, chapters, chapter_id, &options, &downloaded)
            .into_iter()
            .map(|c| Arc::new(ReaderChapter::new(c)))
            .collect();

        let session = Self {
            repos,
            loader,
            downloads,
            tracker,
            options,
            chapters,
            window: Mutex::new(None),
            canceled_downloads: Mutex::new(vec![]),
            downloaded_ahead: Mutex::new(HashSet::new()),
            read_start: Mutex::new(Instant::now()),
            tasks: Mutex::new(JoinSet::new()),
        };
        session.move_to(chapter_id, page).await?;

        Ok(session)
    }

    pub fn manga(&self) -> &Manga {
        self.loader.manga()
    }

    pub fn chapters(&self) -> &[Arc<ReaderChapter>] {
        &self.chapters
    }

    pub fn window(&self) -> Option<ViewerChapters> {
        self.window.lock().ok()?.clone()
    }

    fn index_of(&self, chapter_id: i64) -> Option<usize> {
        self.chapters.iter().position(|c| c.id() == chapter_id)
    }

    fn current(&self) -> Option<(usize, Arc<ReaderChapter>)> {
        let curr = self.window()?.curr;
        Some((self.index_of(curr.id())?, curr))
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.spawn(task);
        }
    }

    /// Makes `chapter_id` the current chapter.
    ///
    /// The new window is referenced before the old one is released so that
    /// chapters in both keep their pages.
    pub async fn move_to(
        &self,
        chapter_id: i64,
        page: Option<usize>,
    ) -> Result<ViewerChapters, ReaderError> {
        let index = self
            .index_of(chapter_id)
            .ok_or(ReaderError::ChapterNotFound(chapter_id))?;
        let curr = self.chapters[index].clone();
        self.loader.load_chapter(&curr, page).await?;

        let window = ViewerChapters {
            prev: index.checked_sub(1).map(|i| self.chapters[i].clone()),
            curr,
            next: self.chapters.get(index + 1).cloned(),
        };
        window.add_ref();

        let old = match self.window.lock() {
            Ok(mut current) => current.replace(window.clone()),
            Err(_) => None,
        };
        if let Some(old) = old {
            if old.curr.id() != chapter_id {
                self.persist_progress(&old.curr).await;
            }
            old.unref();
        }

        let canceled = self.downloads.cancel_queued_downloads(&[chapter_id]);
        if !canceled.is_empty() {
            debug!("paused download of chapter {chapter_id} while reading it");
            if let Ok(mut downloads) = self.canceled_downloads.lock() {
                downloads.extend(canceled);
            }
        }

        Ok(window)
    }

    pub async fn next_chapter(&self) -> Result<Option<ViewerChapters>, ReaderError> {
        let Some(next) = self.window().and_then(|w| w.next) else {
            return Ok(None);
        };
        self.move_to(next.id(), None).await.map(Some)
    }

    pub async fn previous_chapter(&self) -> Result<Option<ViewerChapters>, ReaderError> {
        let Some(prev) = self.window().and_then(|w| w.prev) else {
            return Ok(None);
        };
        self.move_to(prev.id(), None).await.map(Some)
    }

    /// Loads a neighbouring chapter ahead of time. A chapter read online
    /// that got downloaded meanwhile is reloaded from disk.
    pub async fn preload(&self, chapter: &ReaderChapter) -> Result<(), ReaderError> {
        if chapter.loader().is_some_and(|l| !l.is_local()) {
            let downloaded = self
                .downloads
                .is_chapter_downloaded(self.manga(), &chapter.chapter(), false)
                .await?;
            if downloaded {
                debug!("{} was downloaded, reloading from disk", chapter.chapter().name);
                chapter.reset();
            }
        }

        if matches!(
            chapter.state(),
            ReaderChapterState::Loaded(_) | ReaderChapterState::Loading
        ) {
            return Ok(());
        }
        self.loader.load_chapter(chapter, None).await?;
        Ok(())
    }

    /// Handles the viewer showing `page` of the current chapter.
    ///
    /// `has_extra_page` is set when the last two pages are shown joined.
    pub fn on_page_selected(&self, page: usize, has_extra_page: bool) {
        let Some((index, curr)) = self.current() else {
            return;
        };
        let Some(pages) = curr.pages() else {
            return;
        };
        let Some(selected) = pages.get(page) else {
            return;
        };

        let total = pages.len();
        if (page + 1) as f64 / total as f64 > DOWNLOAD_AHEAD_THRESHOLD {
            self.download_ahead(index, &curr);
        }

        if self.options.incognito || selected.state() == PageState::Error {
            return;
        }

        let last = total - 1;
        let completed = page == last || (has_extra_page && page + 1 == last);
        let was_read = curr.chapter().read;
        curr.update_chapter(|c| {
            c.last_page_read = page as i64;
            if completed {
                c.read = true;
            }
        });

        let chapter = curr.chapter();
        let repos = self.repos.clone();
        let saved = chapter.clone();
        self.spawn(async move {
            let chapter = saved;
            if let Err(e) = repos
                .chapter
                .update_chapter_progress(chapter.id, chapter.read, chapter.last_page_read)
                .await
            {
                error!("failed to save progress of {}: {e}", chapter.name);
            }
        });

        if completed && !was_read {
            self.on_chapter_completed(index, &chapter);
        }
    }

    fn on_chapter_completed(&self, index: usize, chapter: &Chapter) {
        // nothing left to download for a chapter that was read
        if let Ok(mut downloads) = self.canceled_downloads.lock() {
            downloads.retain(|d| d.chapter.id != chapter.id);
        }

        if let Some(tracker) = self.tracker.clone().filter(|_| self.options.auto_update_track) {
            if chapter.is_recognized_number() {
                let manga_id = self.manga().id;
                let chapter_number = chapter.chapter_number;
                self.spawn(async move {
                    if let Err(e) = tracker.track_chapter(manga_id, chapter_number, true).await {
                        error!("failed to update tracking of manga {manga_id}: {e}");
                    }
                });
            }
        }

        if let Some(slots) = self.options.remove_after_read_slots {
            let to_delete = index
                .checked_sub(slots)
                .and_then(|i| self.chapters.get(i))
                .map(|c| c.chapter())
                .filter(|c| c.read && !c.bookmark);
            if let Some(to_delete) = to_delete {
                debug!("deleting {} once the reader closes", to_delete.name);
                self.downloads
                    .enqueue_chapters_to_delete(self.manga(), vec![to_delete]);
            }
        }
    }

    /// Queues the chapters after the next one, but only when the current
    /// and the next chapter are downloaded already
    fn download_ahead(&self, index: usize, curr: &ReaderChapter) {
        let amount = self.options.download_ahead;
        if amount == 0 || self.manga().source == LOCAL_SOURCE_ID {
            return;
        }
        let Some(next) = self.chapters.get(index + 1).map(|c| c.chapter()) else {
            return;
        };
        match self.downloaded_ahead.lock() {
            Ok(mut done) => {
                if !done.insert(curr.id()) {
                    return;
                }
            }
            Err(_) => return,
        }

        let current = curr.chapter();
        let candidates: Vec<Chapter> = self.chapters[index + 2..]
            .iter()
            .map(|c| c.chapter())
            .filter(|c| !c.read)
            .collect();
        let manga = self.manga().clone();
        let downloads = self.downloads.clone();
        self.spawn(async move {
            let result = async {
                if !downloads.is_chapter_downloaded(&manga, &current, false).await?
                    || !downloads.is_chapter_downloaded(&manga, &next, false).await?
                {
                    return Ok(());
                }

                let mut to_download = vec![];
                for chapter in candidates {
                    if to_download.len() == amount {
                        break;
                    }
                    if !downloads.is_chapter_downloaded(&manga, &chapter, false).await? {
                        to_download.push(chapter);
                    }
                }
                if !to_download.is_empty() {
                    info!("downloading {} chapters ahead of {}", to_download.len(), current.name);
                    downloads.download_chapters(&manga, to_download, true).await?;
                }
                Ok::<_, DownloadError>(())
            }
            .await;

            if let Err(e) = result {
                error!("failed to download ahead of {}: {e}", current.name);
            }
        });
    }

    async fn persist_progress(&self, chapter: &ReaderChapter) {
        let elapsed = match self.read_start.lock() {
            Ok(mut start) => std::mem::replace(&mut *start, Instant::now()).elapsed(),
            Err(_) => return,
        };
        if self.options.incognito {
            return;
        }

        let chapter = chapter.chapter();
        if let Err(e) = self
            .repos
            .chapter
            .update_chapter_progress(chapter.id, chapter.read, chapter.last_page_read)
            .await
        {
            error!("failed to save progress of {}: {e}", chapter.name);
        }
        let history = History {
            chapter_id: chapter.id,
            last_read: chrono::Utc::now().timestamp_millis(),
            time_read: elapsed.as_millis() as i64,
            ..Default::default()
        };
        if let Err(e) = self.repos.history.upsert_history(&history).await {
            error!("failed to save history of {}: {e}", chapter.name);
        }
    }

    /// Waits for every pending side effect
    pub async fn wait_for_tasks(&self) {
        let mut tasks = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => return,
        };
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                warn!("reader task failed: {e}");
            }
        }
    }

    /// Ends the session: saves progress, runs pending deletions and puts
    /// downloads paused while reading back at the front of the queue
    pub async fn close(&self) {
        let window = match self.window.lock() {
            Ok(mut window) => window.take(),
            Err(_) => None,
        };
        if let Some(window) = window {
            self.persist_progress(&window.curr).await;
            window.unref();
        }

        match self.downloads.delete_pending().await {
            Ok(0) => {}
            Ok(deleted) => info!("deleted {deleted} read chapters"),
            Err(e) => error!("failed to delete read chapters: {e}"),
        }

        let canceled = match self.canceled_downloads.lock() {
            Ok(mut downloads) => std::mem::take(&mut *downloads),
            Err(_) => vec![],
        };
        if !canceled.is_empty() {
            self.downloads.add_downloads_to_start_of_queue(canceled);
        }

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.abort_all();
        }
    }
}
