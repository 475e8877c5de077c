use std::{
    collections::{HashMap, HashSet},
    sync::RwLock,
    time::{Duration, Instant},
};

use shiori_lib::prelude::SourceInfo;

use super::download_provider::{DownloadProvider, TMP_DIR_SUFFIX};
use crate::domain::entities::chapter::Chapter;

const RENEW_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Default)]
struct Index {
    // source dir -> manga dir -> chapter dirs and archives
    sources: HashMap<String, HashMap<String, HashSet<String>>>,
    renewed_at: Option<Instant>,
}

/// In-memory index of downloaded chapters, rebuilt from disk when stale.
#[derive(Debug)]
pub struct DownloadCache {
    provider: DownloadProvider,
    index: RwLock<Index>,
}

impl DownloadCache {
    pub fn new(provider: DownloadProvider) -> Self {
        Self {
            provider,
            index: RwLock::new(Index::default()),
        }
    }

    pub fn provider(&self) -> &DownloadProvider {
        &self.provider
    }

    pub fn is_chapter_downloaded(
        &self,
        source: &SourceInfo,
        manga_title: &str,
        chapter: &Chapter,
        skip_cache: bool,
    ) -> bool {
        if skip_cache {
            return self
                .provider
                .find_chapter_dir(source, manga_title, chapter)
                .is_some();
        }

        self.renew_if_stale();

        let Ok(index) = self.index.read() else {
            return false;
        };
        let source_dir = DownloadProvider::source_dir_name(source);
        let manga_dir = DownloadProvider::manga_dir_name(manga_title);
        index
            .sources
            .get(&source_dir)
            .and_then(|manga| manga.get(&manga_dir))
            .is_some_and(|chapters| {
                DownloadProvider::valid_chapter_dir_names(&chapter.name, chapter.scanlator.as_deref())
                    .iter()
                    .any(|name| chapters.contains(name))
            })
    }

    pub fn downloaded_count(&self, source: &SourceInfo, manga_title: &str) -> usize {
        self.renew_if_stale();

        let Ok(index) = self.index.read() else {
            return 0;
        };
        index
            .sources
            .get(&DownloadProvider::source_dir_name(source))
            .and_then(|manga| manga.get(&DownloadProvider::manga_dir_name(manga_title)))
            .map_or(0, HashSet::len)
    }

    /// Registers a chapter that just finished downloading, `name` being the
    /// final directory or archive name
    pub fn add_chapter(&self, source: &SourceInfo, manga_title: &str, name: String) {
        self.renew_if_stale();

        if let Ok(mut index) = self.index.write() {
            index
                .sources
                .entry(DownloadProvider::source_dir_name(source))
                .or_default()
                .entry(DownloadProvider::manga_dir_name(manga_title))
                .or_default()
                .insert(name);
        }
    }

    pub fn remove_chapters(&self, source: &SourceInfo, manga_title: &str, chapters: &[Chapter]) {
        let Ok(mut index) = self.index.write() else {
            return;
        };
        let Some(manga) = index
            .sources
            .get_mut(&DownloadProvider::source_dir_name(source))
        else {
            return;
        };
        let manga_dir = DownloadProvider::manga_dir_name(manga_title);
        if let Some(entries) = manga.get_mut(&manga_dir) {
            for chapter in chapters {
                for name in DownloadProvider::valid_chapter_dir_names(
                    &chapter.name,
                    chapter.scanlator.as_deref(),
                ) {
                    entries.remove(&name);
                }
            }
            if entries.is_empty() {
                manga.remove(&manga_dir);
            }
        }
    }

    pub fn invalidate(&self) {
        if let Ok(mut index) = self.index.write() {
            index.renewed_at = None;
        }
    }

    fn renew_if_stale(&self) {
        let stale = self.index.read().map_or(true, |index| {
            index
                .renewed_at
                .is_none_or(|renewed_at| renewed_at.elapsed() > RENEW_INTERVAL)
        });
        if stale {
            self.renew();
        }
    }

    /// Rebuilds the index by walking the download directory
    pub fn renew(&self) {
        let mut sources: HashMap<String, HashMap<String, HashSet<String>>> = HashMap::new();

        for source_dir in read_dir_names(self.provider.root(), true) {
            let source_path = self.provider.root().join(&source_dir);
            let mut manga = HashMap::new();
            for manga_dir in read_dir_names(&source_path, true) {
                let chapters: HashSet<String> =
                    read_dir_names(&source_path.join(&manga_dir), false)
                        .into_iter()
                        .filter(|name| !name.ends_with(TMP_DIR_SUFFIX))
                        .collect();
                manga.insert(manga_dir, chapters);
            }
            sources.insert(source_dir, manga);
        }

        debug!("renewed download cache with {} sources", sources.len());

        if let Ok(mut index) = self.index.write() {
            index.sources = sources;
            index.renewed_at = Some(Instant::now());
        }
    }
}

fn read_dir_names(path: &std::path::Path, dirs_only: bool) -> Vec<String> {
    let Ok(read_dir) = path.read_dir() else {
        return vec![];
    };
    read_dir
        .filter_map(Result::ok)
        .filter(|entry| !dirs_only || entry.path().is_dir())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .collect()
}
