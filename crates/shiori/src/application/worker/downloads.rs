use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{Result, anyhow};
use futures::{StreamExt, stream};
use shiori_lib::prelude::HttpSource;
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
    time::sleep,
};

use crate::{
    domain::entities::{
        chapter::Chapter,
        download::{Download, DownloadState},
        manga::Manga,
        page::{Page, PageState},
    },
    infrastructure::{
        archive::{
            self,
            comic_info::{COMIC_INFO_FILE, ComicInfo},
        },
        chapter_cache::ChapterCache,
        config::DownloadConfig,
        download_cache::DownloadCache,
        download_provider::{CBZ_EXTENSION, DownloadProvider, TMP_DIR_SUFFIX},
        download_store::DownloadStore,
        images::{self, SPLIT_MARKER},
    },
};

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY_SECS: u64 = 2;

pub const MIN_DISK_SPACE: u64 = 200 * 1024 * 1024;

const PARALLEL_SOURCES: usize = 5;
const PARALLEL_PAGES: usize = 2;

const QUEUE_WARNING_THRESHOLD: usize = 30;
const SOURCE_WARNING_THRESHOLD: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloaderEvent {
    Completed { chapter_id: i64 },
    Error { chapter_id: Option<i64>, message: String },
    NoSpace { chapter_id: i64 },
    Warning(String),
}

#[derive(Debug, Clone)]
pub struct DownloaderOptions {
    pub save_as_cbz: bool,
    pub split_tall_images: bool,
    pub tall_image_ratio: f64,
    pub password: Option<String>,
    /// first retry delay, doubled on every attempt
    pub retry_delay: Duration,
    pub min_disk_space: u64,
}

impl Default for DownloaderOptions {
    fn default() -> Self {
        Self::from(&DownloadConfig::default())
    }
}

impl From<&DownloadConfig> for DownloaderOptions {
    fn from(config: &DownloadConfig) -> Self {
        Self {
            save_as_cbz: config.save_chapters_as_cbz,
            split_tall_images: config.split_tall_images,
            tall_image_ratio: config.tall_image_ratio,
            password: config.archive_password(),
            retry_delay: Duration::from_secs(RETRY_DELAY_SECS),
            min_disk_space: MIN_DISK_SPACE,
        }
    }
}

/// File name of a page without extension, zero padded so pages sort
pub fn page_file_name(number: usize, total: usize) -> String {
    let width = total.to_string().len().max(3);
    format!("{number:0width$}")
}

/// Counts the page files of a chapter directory. Metadata and temporary files
/// are skipped and the parts of a split page count as one page.
pub fn count_valid_files(dir: &Path) -> usize {
    let Ok(read_dir) = dir.read_dir() else {
        return 0;
    };
    read_dir
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_file())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .filter(|name| name != COMIC_INFO_FILE && name != ".nomedia" && !name.ends_with(".tmp"))
        .filter(|name| match name.split_once(SPLIT_MARKER) {
            Some((_, part)) => part.starts_with("001"),
            None => true,
        })
        .count()
}

fn is_download_successful(download: &Download, tmp_dir: &Path) -> bool {
    let Some(pages) = download.pages() else {
        return false;
    };
    let ready = pages
        .iter()
        .filter(|page| page.state() == PageState::Ready)
        .count();
    if ready != pages.len() {
        return false;
    }

    count_valid_files(tmp_dir) == pages.len()
}

/// Finished file of a page left by an interrupted download
fn find_page_file(dir: &Path, name: &str) -> Option<PathBuf> {
    let first_part = format!("{name}{SPLIT_MARKER}001");
    dir.read_dir()
        .ok()?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext != "tmp"))
        .find(|path| {
            path.file_stem()
                .is_some_and(|stem| stem == name || stem.to_string_lossy() == first_part)
        })
}

/// The running pipeline. `epoch` changes whenever the pipeline is started
/// or cancelled, a task of an older epoch may no longer change downloads.
#[derive(Default)]
struct Job {
    handle: Option<JoinHandle<()>>,
    epoch: u64,
}

struct Inner {
    cache: Arc<DownloadCache>,
    chapter_cache: ChapterCache,
    store: DownloadStore,
    options: DownloaderOptions,
    queue: watch::Sender<Vec<Arc<Download>>>,
    running: watch::Sender<bool>,
    events: broadcast::Sender<DownloaderEvent>,
    job: Mutex<Job>,
}

/// Download queue and the pipeline turning queued chapters into archives.
///
/// Downloads are grouped by source. At most five sources download at a time,
/// chapters of a source download one after the other and two pages of a
/// chapter are fetched at once.
#[derive(Clone)]
pub struct Downloader {
    inner: Arc<Inner>,
}

impl Downloader {
    pub fn new(
        cache: Arc<DownloadCache>,
        chapter_cache: ChapterCache,
        store: DownloadStore,
        options: DownloaderOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                cache,
                chapter_cache,
                store,
                options,
                queue: watch::channel(vec![]).0,
                running: watch::channel(false).0,
                events,
                job: Mutex::new(Job::default()),
            }),
        }
    }

    pub fn queue(&self) -> Vec<Arc<Download>> {
        self.inner.queue.borrow().clone()
    }

    pub fn subscribe_queue(&self) -> watch::Receiver<Vec<Arc<Download>>> {
        self.inner.queue.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<DownloaderEvent> {
        self.inner.events.subscribe()
    }

    pub fn subscribe_running(&self) -> watch::Receiver<bool> {
        self.inner.running.subscribe()
    }

    pub fn is_running(&self) -> bool {
        *self.inner.running.borrow()
    }

    pub fn get_queued_download(&self, chapter_id: i64) -> Option<Arc<Download>> {
        self.inner
            .queue
            .borrow()
            .iter()
            .find(|d| d.chapter.id == chapter_id)
            .cloned()
    }

    pub fn store(&self) -> &DownloadStore {
        &self.inner.store
    }

    /// Queues chapters of a manga. Chapters already downloaded or queued are
    /// skipped, the rest is queued oldest first.
    pub fn queue_chapters(
        &self,
        source: Arc<dyn HttpSource>,
        manga: &Manga,
        chapters: Vec<Chapter>,
        auto_start: bool,
    ) {
        if chapters.is_empty() {
            return;
        }

        let source_info = source.get_source_info();

        let mut seen = HashSet::new();
        let mut chapters: Vec<Chapter> = chapters
            .into_iter()
            .filter(|chapter| seen.insert(chapter.id))
            .collect();
        // source order 0 is the newest chapter
        chapters.sort_by(|a, b| b.source_order.cmp(&a.source_order));

        let downloads: Vec<Arc<Download>> = chapters
            .into_iter()
            .filter(|chapter| {
                !self
                    .inner
                    .cache
                    .is_chapter_downloaded(&source_info, &manga.title, chapter, true)
            })
            .map(|chapter| Arc::new(Download::new(source.clone(), manga.clone(), chapter)))
            .collect();

        let added = self.inner.add_all(downloads, false);
        if added.is_empty() {
            return;
        }
        info!("queued {} chapters of {}", added.len(), manga.title);

        self.inner.warn_if_too_many(source_info.id);

        if auto_start {
            self.start();
        }
    }

    /// Puts previously queued downloads back, keeping their order
    pub fn restore(&self, downloads: Vec<Arc<Download>>) -> usize {
        self.inner.store.clear();
        let downloads = downloads
            .into_iter()
            .filter(|d| {
                !self.inner.cache.is_chapter_downloaded(
                    &d.source.get_source_info(),
                    &d.manga.title,
                    &d.chapter,
                    true,
                )
            })
            .collect();
        self.inner.add_all(downloads, false).len()
    }

    /// Starts the pipeline. Returns `false` when it is already running or
    /// nothing is waiting in the queue.
    pub fn start(&self) -> bool {
        let Ok(mut job) = self.inner.job.lock() else {
            return false;
        };
        if *self.inner.running.borrow() {
            return false;
        }
        if self.inner.pending().is_empty() {
            return false;
        }

        info!("starting downloader");
        job.epoch += 1;
        self.inner.running.send_replace(true);
        job.handle = Some(tokio::spawn(run(self.inner.clone(), job.epoch)));

        true
    }

    /// Stops the pipeline, in-flight downloads go back to the queue
    pub fn pause(&self) {
        info!("pausing downloader");
        self.inner.cancel_job(Some(DownloadState::Queue));
    }

    /// Stops the pipeline, in-flight downloads are marked as failed
    pub fn stop(&self, reason: Option<&str>) {
        info!("stopping downloader");
        self.inner.cancel_job(Some(DownloadState::Error));
        if let Some(reason) = reason {
            warn!("downloader stopped: {reason}");
            self.inner.notify(DownloaderEvent::Error {
                chapter_id: None,
                message: reason.to_string(),
            });
        }
    }

    pub fn clear_queue(&self) {
        self.inner.cancel_job(None);
        self.inner.queue.send_modify(|queue| {
            for download in queue.iter() {
                if matches!(
                    download.state(),
                    DownloadState::Downloading | DownloadState::Queue
                ) {
                    download.set_state(DownloadState::NotDownloaded);
                }
            }
            queue.clear();
        });
        self.inner.store.clear();
    }

    pub fn remove_from_queue(&self, chapter_ids: &[i64]) -> Vec<Arc<Download>> {
        let ids: HashSet<i64> = chapter_ids.iter().copied().collect();
        self.remove_where(|d| ids.contains(&d.chapter.id))
    }

    pub fn remove_from_queue_by_manga(&self, manga_id: i64) -> Vec<Arc<Download>> {
        self.remove_where(|d| d.manga.id == manga_id)
    }

    /// Removes the downloads of the chapters that are still waiting, the
    /// returned downloads can be queued again later
    pub fn cancel_queued(&self, chapter_ids: &[i64]) -> Vec<Arc<Download>> {
        let ids: HashSet<i64> = chapter_ids.iter().copied().collect();
        self.remove_where(|d| ids.contains(&d.chapter.id) && d.state() == DownloadState::Queue)
    }

    fn remove_where(&self, predicate: impl Fn(&Download) -> bool) -> Vec<Arc<Download>> {
        let mut removed = vec![];
        self.inner.queue.send_modify(|queue| {
            queue.retain(|download| {
                if predicate(download) {
                    removed.push(download.clone());
                    false
                } else {
                    true
                }
            });
        });
        if removed.is_empty() {
            return removed;
        }

        let interrupted = removed
            .iter()
            .any(|d| d.state() == DownloadState::Downloading);
        for download in &removed {
            if matches!(
                download.state(),
                DownloadState::Downloading | DownloadState::Queue
            ) {
                download.set_state(DownloadState::NotDownloaded);
            }
        }
        let ids: Vec<i64> = removed.iter().map(|d| d.chapter.id).collect();
        self.inner.store.remove_all(&ids);

        // the pipeline may be working on a removed download
        if interrupted && self.is_running() {
            self.pause();
            self.start();
        }

        removed
    }

    /// Replaces the queue with the given order
    pub fn reorder_queue(&self, downloads: Vec<Arc<Download>>) {
        let was_running = self.is_running();
        if was_running {
            self.pause();
        }

        self.inner.queue.send_replace(downloads.clone());
        self.inner.store.clear();
        self.inner.store.add_all(
            &downloads
                .iter()
                .map(|d| (d.manga.id, d.chapter.id))
                .collect::<Vec<_>>(),
        );

        if was_running {
            self.start();
        }
    }

    pub fn add_downloads_to_start_of_queue(&self, downloads: Vec<Arc<Download>>) {
        if downloads.is_empty() {
            return;
        }
        self.inner.add_all(downloads, true);
        self.start();
    }
}

impl Inner {
    fn notify(&self, event: DownloaderEvent) {
        let _ = self.events.send(event);
    }

    fn pending(&self) -> Vec<Arc<Download>> {
        self.queue
            .borrow()
            .iter()
            .filter(|d| d.state() == DownloadState::Queue)
            .cloned()
            .collect()
    }

    fn add_all(&self, downloads: Vec<Arc<Download>>, front: bool) -> Vec<Arc<Download>> {
        let mut added = vec![];
        self.queue.send_modify(|queue| {
            let mut queued: HashSet<i64> = queue.iter().map(|d| d.chapter.id).collect();
            if front {
                // downloads put in front replace the queued ones
                let ids: HashSet<i64> = downloads.iter().map(|d| d.chapter.id).collect();
                queue.retain(|d| !ids.contains(&d.chapter.id));
                queued = queue.iter().map(|d| d.chapter.id).collect();
            }
            for download in downloads {
                if queued.insert(download.chapter.id) {
                    download.set_state(DownloadState::Queue);
                    added.push(download);
                }
            }
            if front {
                let rest = std::mem::take(queue);
                queue.extend(added.iter().cloned());
                queue.extend(rest);
            } else {
                queue.extend(added.iter().cloned());
            }
        });

        self.store.add_all(
            &added
                .iter()
                .map(|d| (d.manga.id, d.chapter.id))
                .collect::<Vec<_>>(),
        );

        added
    }

    fn warn_if_too_many(&self, source_id: i64) {
        let queue = self.queue.borrow();
        if queue.len() > QUEUE_WARNING_THRESHOLD {
            let message = format!(
                "{} chapters queued, downloading too many at once may get you blocked",
                queue.len()
            );
            warn!("{message}");
            self.notify(DownloaderEvent::Warning(message));
        }

        let from_source = queue.iter().filter(|d| d.source.id() == source_id).count();
        if from_source > SOURCE_WARNING_THRESHOLD {
            let message = format!("{from_source} chapters queued from source {source_id}");
            warn!("{message}");
            self.notify(DownloaderEvent::Warning(message));
        }
    }

    /// Aborts the pipeline and moves in-flight downloads to `demote_to`.
    ///
    /// The aborted task may still run until its next await point, bumping the
    /// epoch under the lock keeps it from touching any download afterwards.
    fn cancel_job(&self, demote_to: Option<DownloadState>) {
        let Ok(mut job) = self.job.lock() else {
            return;
        };
        if let Some(handle) = job.handle.take() {
            handle.abort();
        }
        job.epoch += 1;
        self.running.send_replace(false);

        if let Some(state) = demote_to {
            for download in self.queue.borrow().iter() {
                if download.state() == DownloadState::Downloading {
                    download.set_state(state);
                }
            }
        }
    }

    /// Changes the state of a download on behalf of the pipeline of `epoch`.
    /// Returns `false` when that pipeline was cancelled in the meantime.
    fn transition(&self, epoch: u64, download: &Download, state: DownloadState) -> bool {
        let Ok(job) = self.job.lock() else {
            return false;
        };
        if job.epoch != epoch {
            return false;
        }
        download.set_state(state);
        true
    }

    /// The archive is on disk, so the download is done whatever the epoch
    fn complete(&self, download: &Download) {
        download.set_state(DownloadState::Downloaded);
        self.queue
            .send_modify(|queue| queue.retain(|d| d.chapter.id != download.chapter.id));
        self.store.remove_all(&[download.chapter.id]);
    }

    async fn download_chapter(&self, epoch: u64, download: &Arc<Download>) {
        if let Err(e) = self.try_download_chapter(epoch, download).await {
            if !self.transition(epoch, download, DownloadState::Error) {
                debug!("download of {} was cancelled", download.chapter.name);
                return;
            }
            error!(
                "failed to download {} of {}: {e}",
                download.chapter.name, download.manga.title
            );
            self.notify(DownloaderEvent::Error {
                chapter_id: Some(download.chapter.id),
                message: e.to_string(),
            });
        }
    }

    async fn try_download_chapter(&self, epoch: u64, download: &Arc<Download>) -> Result<()> {
        let source_info = download.source.get_source_info();
        let manga_dir = self
            .cache
            .provider()
            .get_or_create_manga_dir(&source_info, &download.manga.title)?;

        let available = fs2::available_space(&manga_dir)?;
        if available < self.options.min_disk_space {
            if !self.transition(epoch, download, DownloadState::Error) {
                return Ok(());
            }
            error!(
                "not enough space to download {}, {available} bytes available",
                download.chapter.name
            );
            self.notify(DownloaderEvent::NoSpace {
                chapter_id: download.chapter.id,
            });
            return Ok(());
        }

        let chapter_dir_name = DownloadProvider::chapter_dir_name(
            &download.chapter.name,
            download.chapter.scanlator.as_deref(),
        );
        let tmp_dir = manga_dir.join(format!("{chapter_dir_name}{TMP_DIR_SUFFIX}"));

        let pages = match download.pages() {
            Some(pages) => pages,
            None => {
                let pages = download
                    .source
                    .get_page_list(&download.chapter.to_chapter_info())
                    .await?;
                if pages.is_empty() {
                    return Err(anyhow!("page list is empty"));
                }
                let pages: Vec<Arc<Page>> = pages
                    .into_iter()
                    .enumerate()
                    .map(|(index, page)| Arc::new(Page::new(index, page.url, page.image_url)))
                    .collect();
                download.set_pages(Some(pages.clone()));
                pages
            }
        };

        if !self.transition(epoch, download, DownloadState::Downloading) {
            return Err(anyhow!("downloader was cancelled"));
        }

        tokio::fs::create_dir_all(&tmp_dir).await?;
        let mut read_dir = tokio::fs::read_dir(&tmp_dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            if entry.file_name().to_string_lossy().ends_with(".tmp") {
                let _ = tokio::fs::remove_file(entry.path()).await;
            }
        }

        let total = pages.len();
        let tmp_dir_ref = &tmp_dir;
        stream::iter(pages.iter().cloned())
            .for_each_concurrent(PARALLEL_PAGES, move |page| async move {
                if let Err(e) = self.download_page(download, &page, tmp_dir_ref, total).await {
                    error!(
                        "failed to download page {} of {}: {e}",
                        page.number(),
                        download.chapter.name
                    );
                    page.set_progress(0);
                    page.set_state(PageState::Error);
                }
            })
            .await;

        let mut comic_info = ComicInfo::new(&download.manga, &download.chapter, &source_info.name);
        if self.options.password.is_some() {
            comic_info.padding = Some(archive::comic_info_padding());
        }
        tokio::fs::write(tmp_dir.join(COMIC_INFO_FILE), comic_info.to_xml()?).await?;

        if !is_download_successful(download, &tmp_dir) {
            return Err(anyhow!("not all pages were downloaded"));
        }

        let final_name = if self.options.save_as_cbz {
            let name = format!("{chapter_dir_name}.{CBZ_EXTENSION}");
            let dest = manga_dir.join(&name);
            let password = self.options.password.clone();
            let src = tmp_dir.clone();
            tokio::task::spawn_blocking(move || archive::create_cbz(&src, &dest, password.as_deref()))
                .await??;
            tokio::fs::remove_dir_all(&tmp_dir).await?;
            name
        } else {
            tokio::fs::rename(&tmp_dir, manga_dir.join(&chapter_dir_name)).await?;
            chapter_dir_name
        };

        self.cache
            .add_chapter(&source_info, &download.manga.title, final_name);
        self.complete(download);
        info!(
            "downloaded {} of {}",
            download.chapter.name, download.manga.title
        );
        self.notify(DownloaderEvent::Completed {
            chapter_id: download.chapter.id,
        });

        Ok(())
    }

    async fn download_page(
        &self,
        download: &Download,
        page: &Page,
        tmp_dir: &Path,
        total: usize,
    ) -> Result<()> {
        let name = page_file_name(page.number(), total);

        if page.image_url().is_none() {
            page.set_state(PageState::LoadPage);
            let url = download.source.get_image_url(&page.to_page_info()).await?;
            page.set_image_url(Some(url));
        }
        let image_url = page
            .image_url()
            .ok_or_else(|| anyhow!("page {} has no image url", page.number()))?;

        let path = if let Some(path) = find_page_file(tmp_dir, &name) {
            path
        } else if let Some(data) = self.chapter_cache.get_image(&image_url).await {
            let ext = images::sniff_extension(None, &image_url, &data);
            let path = tmp_dir.join(format!("{name}.{ext}"));
            tokio::fs::write(&path, &data).await?;
            self.split_if_tall(path).await
        } else {
            let path = self
                .download_image(download, page, &image_url, tmp_dir, &name)
                .await?;
            self.split_if_tall(path).await
        };

        page.set_location(Some(path.display().to_string()));
        page.set_progress(100);
        page.set_state(PageState::Ready);

        Ok(())
    }

    async fn download_image(
        &self,
        download: &Download,
        page: &Page,
        image_url: &str,
        tmp_dir: &Path,
        name: &str,
    ) -> Result<PathBuf> {
        page.set_state(PageState::DownloadImage);
        page.set_progress(0);

        let page_info = page.to_page_info();
        let mut attempts = 0;
        let response = loop {
            match download.source.get_image(&page_info).await {
                Ok(response) => break response,
                Err(e) if attempts < MAX_RETRIES => {
                    let delay = self.options.retry_delay * 2_u32.pow(attempts);
                    warn!(
                        "failed to download {image_url}, retrying in {}ms: {e}",
                        delay.as_millis()
                    );
                    attempts += 1;
                    sleep(delay).await;
                }
                Err(e) => {
                    return Err(anyhow!(
                        "failed to download {image_url} after {MAX_RETRIES} retries: {e}"
                    ));
                }
            }
        };

        let tmp_file = tmp_dir.join(format!("{name}.tmp"));
        tokio::fs::write(&tmp_file, &response.data).await?;
        let ext = images::sniff_extension(response.content_type.as_deref(), image_url, &response.data);
        let path = tmp_dir.join(format!("{name}.{ext}"));
        tokio::fs::rename(&tmp_file, &path).await?;

        Ok(path)
    }

    /// Returns the first part of a split page or the page itself. A page
    /// that can not be split is kept as downloaded.
    async fn split_if_tall(&self, path: PathBuf) -> PathBuf {
        if !self.options.split_tall_images {
            return path;
        }
        let ratio = self.options.tall_image_ratio;
        let src = path.clone();
        let parts = tokio::task::spawn_blocking(move || images::split_tall_image(&src, ratio))
            .await
            .map_err(anyhow::Error::from)
            .and_then(|parts| parts);
        match parts {
            Ok(parts) => parts.into_iter().next().unwrap_or(path),
            Err(e) => {
                warn!("keeping {} unsplit: {e}", path.display());
                path
            }
        }
    }
}

/// Groups downloads by source keeping the order in which sources first appear
fn group_by_source(downloads: Vec<Arc<Download>>) -> Vec<Vec<Arc<Download>>> {
    let mut groups: Vec<(i64, Vec<Arc<Download>>)> = vec![];
    for download in downloads {
        let source_id = download.source.id();
        match groups.iter_mut().find(|(id, _)| *id == source_id) {
            Some((_, group)) => group.push(download),
            None => groups.push((source_id, vec![download])),
        }
    }
    groups.into_iter().map(|(_, group)| group).collect()
}

async fn run(inner: Arc<Inner>, epoch: u64) {
    loop {
        let pending = inner.pending();
        if pending.is_empty() {
            let Ok(mut job) = inner.job.lock() else {
                return;
            };
            if job.epoch != epoch {
                return;
            }
            if inner.pending().is_empty() {
                info!("download queue is empty, stopping downloader");
                job.handle = None;
                inner.running.send_replace(false);
                return;
            }
            continue;
        }

        let inner_ref = &inner;
        stream::iter(group_by_source(pending))
            .for_each_concurrent(PARALLEL_SOURCES, move |group| async move {
                for download in group {
                    // paused, stopped or removed while waiting
                    if download.state() != DownloadState::Queue {
                        continue;
                    }
                    inner_ref.download_chapter(epoch, &download).await;
                }
            })
            .await;
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::Ordering;

    use bytes::Bytes;
    use tokio::{sync::Semaphore, time::timeout};

    use super::*;
    use crate::test_util::{FakeSource, png};

    struct Fixture {
        dir: tempfile::TempDir,
        cache: Arc<DownloadCache>,
        downloader: Downloader,
    }

    fn fixture(options: DownloaderOptions) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(DownloadCache::new(DownloadProvider::new(
            dir.path().join("downloads"),
        )));
        let downloader = Downloader::new(
            cache.clone(),
            ChapterCache::new(dir.path().join("cache")),
            DownloadStore::open(dir.path().join("downloads.json")),
            options,
        );
        Fixture {
            dir,
            cache,
            downloader,
        }
    }

    fn fast_options() -> DownloaderOptions {
        DownloaderOptions {
            retry_delay: Duration::from_millis(1),
            min_disk_space: 0,
            ..Default::default()
        }
    }

    fn manga() -> Manga {
        Manga {
            id: 1,
            title: "Title".to_string(),
            ..Default::default()
        }
    }

    fn chapter(id: i64, source_order: i64) -> Chapter {
        Chapter {
            id,
            manga_id: 1,
            url: format!("/chapter/{id}"),
            name: format!("Chapter {id}"),
            source_order,
            ..Default::default()
        }
    }

    async fn wait_for(
        events: &mut broadcast::Receiver<DownloaderEvent>,
        f: impl Fn(&DownloaderEvent) -> bool,
    ) -> DownloaderEvent {
        timeout(Duration::from_secs(10), async {
            loop {
                let event = events.recv().await.unwrap();
                if f(&event) {
                    return event;
                }
            }
        })
        .await
        .unwrap()
    }

    async fn wait_until_stopped(downloader: &Downloader) {
        let mut running = downloader.subscribe_running();
        timeout(Duration::from_secs(10), running.wait_for(|running| !running))
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_page_file_name() {
        assert_eq!(page_file_name(1, 20), "001");
        assert_eq!(page_file_name(12, 999), "012");
        assert_eq!(page_file_name(12, 1200), "0012");
    }

    #[test]
    fn test_count_valid_files_counts_split_pages_once() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "001.jpg",
            "002__001.jpg",
            "002__002.jpg",
            "002__003.jpg",
            "003.png",
            "004.tmp",
            "ComicInfo.xml",
            ".nomedia",
        ] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir_all(dir.path().join("nested")).unwrap();

        assert_eq!(count_valid_files(dir.path()), 3);
    }

    #[test]
    fn test_download_needs_every_page_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let download = Download::new(Arc::new(FakeSource::new(1, 2)), manga(), chapter(1, 0));
        assert!(!is_download_successful(&download, dir.path()));

        let pages: Vec<Arc<Page>> = (0..2)
            .map(|i| Arc::new(Page::new(i, String::new(), None)))
            .collect();
        download.set_pages(Some(pages.clone()));
        pages.iter().for_each(|p| p.set_state(PageState::Ready));
        std::fs::write(dir.path().join("001.jpg"), b"x").unwrap();
        assert!(!is_download_successful(&download, dir.path()));

        std::fs::write(dir.path().join("002__001.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("002__002.jpg"), b"x").unwrap();
        assert!(is_download_successful(&download, dir.path()));

        pages[1].set_state(PageState::Error);
        assert!(!is_download_successful(&download, dir.path()));
    }

    #[tokio::test]
    async fn test_queue_never_holds_the_same_chapter_twice() {
        let f = fixture(fast_options());
        let source: Arc<dyn HttpSource> = Arc::new(FakeSource::new(1, 1));

        f.downloader.queue_chapters(
            source.clone(),
            &manga(),
            vec![chapter(1, 0), chapter(2, 1), chapter(1, 0), chapter(3, 2)],
            false,
        );
        f.downloader
            .queue_chapters(source, &manga(), vec![chapter(2, 1), chapter(4, 3)], false);

        let ids: Vec<i64> = f.downloader.queue().iter().map(|d| d.chapter.id).collect();
        assert_eq!(ids, vec![3, 2, 1, 4]);
        assert!(
            f.downloader
                .queue()
                .iter()
                .all(|d| d.state() == DownloadState::Queue)
        );
        assert_eq!(f.downloader.store().len(), 4);
        assert!(!f.downloader.is_running());
    }

    #[tokio::test]
    async fn test_downloaded_chapters_are_not_queued() {
        let f = fixture(fast_options());
        let source: Arc<dyn HttpSource> = Arc::new(FakeSource::new(1, 1));
        let manga_dir = f
            .cache
            .provider()
            .get_or_create_manga_dir(&source.get_source_info(), "Title")
            .unwrap();
        std::fs::write(manga_dir.join("Chapter 1.cbz"), b"zip").unwrap();

        f.downloader
            .queue_chapters(source, &manga(), vec![chapter(1, 0), chapter(2, 1)], false);

        let ids: Vec<i64> = f.downloader.queue().iter().map(|d| d.chapter.id).collect();
        assert_eq!(ids, vec![2]);
    }

    #[tokio::test]
    async fn test_download_chapter_to_cbz() {
        let f = fixture(fast_options());
        let source: Arc<dyn HttpSource> = Arc::new(FakeSource::new(1, 3));
        let mut events = f.downloader.subscribe_events();

        f.downloader
            .queue_chapters(source.clone(), &manga(), vec![chapter(1, 0)], true);

        let event = wait_for(&mut events, |e| {
            matches!(e, DownloaderEvent::Completed { .. } | DownloaderEvent::Error { .. })
        })
        .await;
        assert_eq!(event, DownloaderEvent::Completed { chapter_id: 1 });
        wait_until_stopped(&f.downloader).await;

        let cbz = f
            .dir
            .path()
            .join("downloads/Source 1 (EN)/Title/Chapter 1.cbz");
        assert!(cbz.is_file());
        assert_eq!(
            archive::image_entries(&cbz).unwrap(),
            vec!["001.png", "002.png", "003.png"]
        );
        assert!(archive::read_entry(&cbz, COMIC_INFO_FILE, None).is_ok());
        assert!(!cbz.with_file_name("Chapter 1_tmp").exists());

        assert!(f.cache.is_chapter_downloaded(
            &source.get_source_info(),
            "Title",
            &chapter(1, 0),
            false
        ));
        assert!(f.downloader.queue().is_empty());
        assert!(f.downloader.store().is_empty());
    }

    #[tokio::test]
    async fn test_download_chapter_to_directory_with_split_pages() {
        let f = fixture(DownloaderOptions {
            save_as_cbz: false,
            split_tall_images: true,
            tall_image_ratio: 3.0,
            ..fast_options()
        });
        let mut fake = FakeSource::new(1, 2);
        fake.image = png(10, 100);
        let source: Arc<dyn HttpSource> = Arc::new(fake);
        let mut events = f.downloader.subscribe_events();

        f.downloader
            .queue_chapters(source, &manga(), vec![chapter(1, 0)], true);

        let event = wait_for(&mut events, |e| {
            matches!(e, DownloaderEvent::Completed { .. } | DownloaderEvent::Error { .. })
        })
        .await;
        assert_eq!(event, DownloaderEvent::Completed { chapter_id: 1 });

        let dir = f.dir.path().join("downloads/Source 1 (EN)/Title/Chapter 1");
        assert!(dir.is_dir());
        assert!(dir.join("001__001.jpg").is_file());
        assert!(dir.join("002__004.jpg").is_file());
        assert!(!dir.join("001.png").exists());
        assert_eq!(count_valid_files(&dir), 2);
    }

    #[tokio::test]
    async fn test_page_that_can_not_be_split_is_kept() {
        let f = fixture(DownloaderOptions {
            save_as_cbz: false,
            split_tall_images: true,
            tall_image_ratio: 3.0,
            ..fast_options()
        });
        let mut fake = FakeSource::new(1, 2);
        fake.image = Bytes::from_static(b"\0\0\0\x20ftypavif\0\0\0\0avifmif1miaf");
        fake.content_type = Some("image/avif".to_string());
        let mut events = f.downloader.subscribe_events();

        f.downloader
            .queue_chapters(Arc::new(fake), &manga(), vec![chapter(1, 0)], true);

        let event = wait_for(&mut events, |e| {
            matches!(e, DownloaderEvent::Completed { .. } | DownloaderEvent::Error { .. })
        })
        .await;
        assert_eq!(event, DownloaderEvent::Completed { chapter_id: 1 });

        let dir = f.dir.path().join("downloads/Source 1 (EN)/Title/Chapter 1");
        assert!(dir.join("001.avif").is_file());
        assert!(dir.join("002.avif").is_file());
        assert_eq!(count_valid_files(&dir), 2);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let f = fixture(fast_options());
        let mut fake = FakeSource::new(1, 2);
        fake.failures.insert(1, 3);
        let fake = Arc::new(fake);
        let mut events = f.downloader.subscribe_events();

        f.downloader
            .queue_chapters(fake.clone(), &manga(), vec![chapter(1, 0)], true);

        let event = wait_for(&mut events, |e| {
            matches!(e, DownloaderEvent::Completed { .. } | DownloaderEvent::Error { .. })
        })
        .await;
        assert_eq!(event, DownloaderEvent::Completed { chapter_id: 1 });
        assert_eq!(fake.attempts.lock().unwrap().get(&1), Some(&4));
    }

    #[tokio::test]
    async fn test_failed_page_fails_only_its_chapter() {
        let f = fixture(fast_options());
        let mut fake = FakeSource::new(1, 3);
        fake.failures.insert(1, usize::MAX);
        let failing: Arc<dyn HttpSource> = Arc::new(fake);
        let working: Arc<dyn HttpSource> = Arc::new(FakeSource::new(2, 2));
        let mut events = f.downloader.subscribe_events();

        f.downloader
            .queue_chapters(failing, &manga(), vec![chapter(1, 0)], false);
        f.downloader
            .queue_chapters(working, &manga(), vec![chapter(2, 0)], false);
        let failed = f.downloader.get_queued_download(1).unwrap();
        assert!(f.downloader.start());

        let mut completed = vec![];
        let mut errors = vec![];
        while completed.len() + errors.len() < 2 {
            match wait_for(&mut events, |_| true).await {
                DownloaderEvent::Completed { chapter_id } => completed.push(chapter_id),
                DownloaderEvent::Error { chapter_id, .. } => errors.push(chapter_id),
                _ => {}
            }
        }
        assert_eq!(completed, vec![2]);
        assert_eq!(errors, vec![Some(1)]);
        wait_until_stopped(&f.downloader).await;

        assert_eq!(failed.state(), DownloadState::Error);
        let pages = failed.pages().unwrap();
        assert_eq!(pages[0].state(), PageState::Ready);
        assert_eq!(pages[1].state(), PageState::Error);
        assert_eq!(pages[2].state(), PageState::Ready);

        let manga_dir = f.dir.path().join("downloads/Source 1 (EN)/Title");
        assert!(!manga_dir.join("Chapter 1.cbz").exists());
        assert!(manga_dir.join("Chapter 1_tmp").is_dir());

        // failed downloads stay in the queue
        let ids: Vec<i64> = f.downloader.queue().iter().map(|d| d.chapter.id).collect();
        assert_eq!(ids, vec![1]);
    }

    #[tokio::test]
    async fn test_start_resumes_only_queued_downloads() {
        let f = fixture(fast_options());
        let fake = Arc::new(FakeSource::new(1, 1));
        let mut events = f.downloader.subscribe_events();

        f.downloader.queue_chapters(
            fake.clone(),
            &manga(),
            vec![chapter(1, 1), chapter(2, 0)],
            false,
        );
        let errored = f.downloader.get_queued_download(1).unwrap();
        errored.set_state(DownloadState::Error);

        assert!(f.downloader.start());
        let event = wait_for(&mut events, |e| matches!(e, DownloaderEvent::Completed { .. })).await;
        assert_eq!(event, DownloaderEvent::Completed { chapter_id: 2 });
        wait_until_stopped(&f.downloader).await;

        assert_eq!(errored.state(), DownloadState::Error);
        assert_eq!(fake.page_list_calls.load(Ordering::SeqCst), 1);

        // nothing left in QUEUE state
        assert!(!f.downloader.start());
    }

    #[tokio::test]
    async fn test_pause_and_stop_demote_downloading() {
        let f = fixture(fast_options());
        let gate = Arc::new(Semaphore::new(0));
        let mut fake = FakeSource::new(1, 2);
        fake.gate = Some(gate.clone());
        let source: Arc<dyn HttpSource> = Arc::new(fake);

        f.downloader
            .queue_chapters(source, &manga(), vec![chapter(1, 0)], true);
        let download = f.downloader.get_queued_download(1).unwrap();
        let mut state = download.subscribe();
        timeout(
            Duration::from_secs(10),
            state.wait_for(|s| *s == DownloadState::Downloading),
        )
        .await
        .unwrap()
        .unwrap();

        f.downloader.pause();
        assert_eq!(download.state(), DownloadState::Queue);
        assert!(!f.downloader.is_running());

        assert!(f.downloader.start());
        timeout(
            Duration::from_secs(10),
            state.wait_for(|s| *s == DownloadState::Downloading),
        )
        .await
        .unwrap()
        .unwrap();

        f.downloader.stop(Some("network lost"));
        assert_eq!(download.state(), DownloadState::Error);
        assert!(!f.downloader.is_running());
        assert!(!f.downloader.start());
        gate.add_permits(10);
    }

    #[tokio::test]
    async fn test_cancelled_pipeline_can_not_change_downloads() {
        let f = fixture(fast_options());
        let gate = Arc::new(Semaphore::new(0));
        let mut fake = FakeSource::new(1, 1);
        fake.gate = Some(gate.clone());
        let mut events = f.downloader.subscribe_events();

        f.downloader
            .queue_chapters(Arc::new(fake), &manga(), vec![chapter(1, 0)], true);
        let download = f.downloader.get_queued_download(1).unwrap();
        let mut state = download.subscribe();
        timeout(
            Duration::from_secs(10),
            state.wait_for(|s| *s == DownloadState::Downloading),
        )
        .await
        .unwrap()
        .unwrap();
        let paused_epoch = f.downloader.inner.job.lock().unwrap().epoch;

        f.downloader.pause();
        // the aborted task may still be between two await points
        assert!(
            !f.downloader
                .inner
                .transition(paused_epoch, &download, DownloadState::Downloading)
        );
        assert!(
            !f.downloader
                .inner
                .transition(paused_epoch, &download, DownloadState::Error)
        );
        assert_eq!(download.state(), DownloadState::Queue);

        assert!(f.downloader.start());
        gate.add_permits(10);
        let event = wait_for(&mut events, |e| {
            matches!(e, DownloaderEvent::Completed { .. } | DownloaderEvent::Error { .. })
        })
        .await;
        assert_eq!(event, DownloaderEvent::Completed { chapter_id: 1 });
        assert_eq!(download.state(), DownloadState::Downloaded);
    }

    #[tokio::test]
    async fn test_auto_start_with_failed_downloads_in_queue() {
        let f = fixture(fast_options());
        let mut failing = FakeSource::new(1, 1);
        failing.failures.insert(0, usize::MAX);
        let mut events = f.downloader.subscribe_events();

        f.downloader
            .queue_chapters(Arc::new(failing), &manga(), vec![chapter(1, 0)], true);
        let event = wait_for(&mut events, |e| {
            matches!(e, DownloaderEvent::Completed { .. } | DownloaderEvent::Error { .. })
        })
        .await;
        assert!(matches!(
            event,
            DownloaderEvent::Error {
                chapter_id: Some(1),
                ..
            }
        ));
        wait_until_stopped(&f.downloader).await;
        assert_eq!(f.downloader.queue().len(), 1);

        f.downloader.queue_chapters(
            Arc::new(FakeSource::new(2, 1)),
            &manga(),
            vec![chapter(2, 0)],
            true,
        );
        let event = wait_for(&mut events, |e| {
            matches!(e, DownloaderEvent::Completed { .. } | DownloaderEvent::Error { .. })
        })
        .await;
        assert_eq!(event, DownloaderEvent::Completed { chapter_id: 2 });
    }

    #[tokio::test]
    async fn test_not_enough_space() {
        let f = fixture(DownloaderOptions {
            min_disk_space: u64::MAX,
            ..fast_options()
        });
        let fake = Arc::new(FakeSource::new(1, 1));
        let mut events = f.downloader.subscribe_events();

        f.downloader
            .queue_chapters(fake.clone(), &manga(), vec![chapter(1, 0)], true);

        let event = wait_for(&mut events, |e| matches!(e, DownloaderEvent::NoSpace { .. })).await;
        assert_eq!(event, DownloaderEvent::NoSpace { chapter_id: 1 });
        assert_eq!(
            f.downloader.get_queued_download(1).unwrap().state(),
            DownloadState::Error
        );
        assert_eq!(fake.page_list_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_clear_and_remove() {
        let f = fixture(fast_options());
        let source: Arc<dyn HttpSource> = Arc::new(FakeSource::new(1, 1));

        f.downloader.queue_chapters(
            source.clone(),
            &manga(),
            vec![chapter(1, 2), chapter(2, 1), chapter(3, 0)],
            false,
        );
        let first = f.downloader.get_queued_download(1).unwrap();

        let removed = f.downloader.remove_from_queue(&[1]);
        assert_eq!(removed.len(), 1);
        assert_eq!(first.state(), DownloadState::NotDownloaded);
        assert_eq!(f.downloader.store().len(), 2);

        f.downloader.add_downloads_to_start_of_queue(removed);
        let ids: Vec<i64> = f.downloader.queue().iter().map(|d| d.chapter.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(first.state(), DownloadState::Queue);
        f.downloader.pause();

        let mut reversed = f.downloader.queue();
        reversed.reverse();
        f.downloader.reorder_queue(reversed);
        let ids: Vec<i64> = f.downloader.queue().iter().map(|d| d.chapter.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
        let stored: Vec<i64> = f
            .downloader
            .store()
            .restore()
            .iter()
            .map(|d| d.chapter_id)
            .collect();
        assert_eq!(stored, vec![3, 2, 1]);

        let queue = f.downloader.queue();
        f.downloader.clear_queue();
        assert!(f.downloader.queue().is_empty());
        assert!(f.downloader.store().is_empty());
        assert!(
            queue
                .iter()
                .all(|d| d.state() == DownloadState::NotDownloaded)
        );
    }

    #[tokio::test]
    async fn test_many_downloads_warn() {
        let f = fixture(fast_options());
        let source: Arc<dyn HttpSource> = Arc::new(FakeSource::new(1, 1));
        let mut events = f.downloader.subscribe_events();

        let chapters = (1..=16).map(|id| chapter(id, id)).collect();
        f.downloader
            .queue_chapters(source, &manga(), chapters, false);

        let event = wait_for(&mut events, |e| matches!(e, DownloaderEvent::Warning(_))).await;
        assert_eq!(
            event,
            DownloaderEvent::Warning("16 chapters queued from source 1".to_string())
        );
    }

    #[test]
    fn test_group_by_source_keeps_first_appearance_order() {
        let a: Arc<dyn HttpSource> = Arc::new(FakeSource::new(1, 1));
        let b: Arc<dyn HttpSource> = Arc::new(FakeSource::new(2, 1));
        let downloads = vec![
            Arc::new(Download::new(b.clone(), manga(), chapter(1, 0))),
            Arc::new(Download::new(a.clone(), manga(), chapter(2, 0))),
            Arc::new(Download::new(b, manga(), chapter(3, 0))),
            Arc::new(Download::new(a, manga(), chapter(4, 0))),
        ];

        let groups: Vec<Vec<i64>> = group_by_source(downloads)
            .iter()
            .map(|group| group.iter().map(|d| d.chapter.id).collect())
            .collect();
        assert_eq!(groups, vec![vec![1, 3], vec![2, 4]]);
    }
}
