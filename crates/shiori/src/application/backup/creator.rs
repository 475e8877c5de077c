use std::{
    collections::{BTreeSet, HashMap},
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::Local;
use tokio::io::AsyncWriteExt;

use super::{BackupError, backup_filename, codec, rotate_backups};
use crate::{
    domain::{
        entities::{
            backup::{
                Backup, BackupCategory, BackupChapter, BackupCustomInfo, BackupHistory,
                BackupManga, BackupMergedMangaReference, BackupSavedSearch, BackupSource,
                BackupTracking,
            },
            manga::Manga,
            merged::MERGED_SOURCE_ID,
        },
        repositories::Repositories,
    },
    infrastructure::{config::BackupConfig, sources::SourceManager},
};

pub struct BackupCreator {
    repos: Repositories,
    sources: Arc<SourceManager>,
    options: BackupConfig,
}

impl BackupCreator {
    pub fn new(repos: Repositories, sources: Arc<SourceManager>, options: BackupConfig) -> Self {
        Self {
            repos,
            sources,
            options,
        }
    }

    pub async fn create_backup(&self) -> Result<Backup, BackupError> {
        let mut manga = self.repos.manga.get_favorites().await?;
        if self.options.include_non_library_entries {
            manga.extend(self.repos.manga.get_read_non_favorites().await?);
        }

        let mut backup_manga = Vec::with_capacity(manga.len());
        for manga in &manga {
            backup_manga.push(self.backup_manga(manga).await?);
        }

        let categories = if self.options.include_categories {
            self.repos
                .category
                .get_categories()
                .await?
                .into_iter()
                .map(|c| BackupCategory {
                    name: c.name,
                    order: c.sort,
                    flags: c.flags,
                })
                .collect()
        } else {
            vec![]
        };

        let saved_searches = self
            .repos
            .saved_search
            .get_saved_searches()
            .await?
            .into_iter()
            .map(|s| BackupSavedSearch {
                source: s.source,
                name: s.name,
                query: s.query,
                filters_json: s.filters_json,
            })
            .collect();

        let source_ids: BTreeSet<i64> = backup_manga
            .iter()
            .map(|m| m.source)
            .chain(
                backup_manga
                    .iter()
                    .flat_map(|m| m.merged_references.iter().map(|r| r.manga_source)),
            )
            .collect();
        let sources = source_ids
            .into_iter()
            .map(|source_id| BackupSource {
                name: self.sources.get(source_id).info().name,
                source_id,
            })
            .collect();

        debug!("backing up {} manga", backup_manga.len());

        Ok(Backup {
            manga: backup_manga,
            categories,
            sources,
            saved_searches,
        })
    }

    async fn backup_manga(&self, manga: &Manga) -> Result<BackupManga, BackupError> {
        let chapters = self.repos.chapter.get_chapters_by_manga_id(manga.id).await?;

        let mut backup = BackupManga {
            source: manga.source,
            url: manga.url.clone(),
            title: manga.title.clone(),
            artist: manga.artist.clone(),
            author: manga.author.clone(),
            description: manga.description.clone(),
            genre: manga.genre.clone(),
            status: manga.status,
            thumbnail_url: manga.thumbnail_url.clone(),
            favorite: manga.favorite,
            date_added: manga.date_added,
            chapter_flags: manga.chapter_flags.0,
            filtered_scanlators: manga.filtered_scanlators.clone(),
            ..Default::default()
        };

        if self.options.include_chapters {
            backup.chapters = chapters
                .iter()
                .map(|c| BackupChapter {
                    url: c.url.clone(),
                    name: c.name.clone(),
                    scanlator: c.scanlator.clone(),
                    read: c.read,
                    bookmark: c.bookmark,
                    last_page_read: c.last_page_read,
                    chapter_number: c.chapter_number,
                    source_order: c.source_order,
                    date_fetch: c.date_fetch,
                    date_upload: c.date_upload,
                })
                .collect();
        }

        if self.options.include_categories {
            backup.categories = self
                .repos
                .category
                .get_categories_by_manga_id(manga.id)
                .await?
                .into_iter()
                .map(|c| c.sort)
                .collect();
        }

        if self.options.include_tracking {
            backup.tracking = self
                .repos
                .track
                .get_tracks_by_manga_id(manga.id)
                .await?
                .into_iter()
                .map(|t| BackupTracking {
                    sync_id: t.sync_id,
                    remote_id: t.remote_id,
                    library_id: t.library_id,
                    title: t.title,
                    last_chapter_read: t.last_chapter_read,
                    total_chapters: t.total_chapters,
                    status: t.status,
                    score: t.score,
                    remote_url: t.remote_url,
                    start_date: t.start_date,
                    finish_date: t.finish_date,
                })
                .collect();
        }

        if self.options.include_history {
            let urls: HashMap<i64, &str> = chapters.iter().map(|c| (c.id, c.url.as_str())).collect();
            backup.history = self
                .repos
                .history
                .get_history_by_manga_id(manga.id)
                .await?
                .into_iter()
                .filter_map(|h| {
                    Some(BackupHistory {
                        url: urls.get(&h.chapter_id)?.to_string(),
                        last_read: h.last_read,
                        read_duration: h.time_read,
                    })
                })
                .collect();
        }

        if manga.source == MERGED_SOURCE_ID {
            backup.merged_references = self
                .repos
                .merged
                .get_references_by_merge_id(manga.id)
                .await?
                .into_iter()
                .map(|r| BackupMergedMangaReference {
                    is_info_manga: r.is_info_manga,
                    get_chapter_updates: r.get_chapter_updates,
                    chapter_sort_mode: r.chapter_sort_mode,
                    chapter_priority: r.chapter_priority,
                    download_chapters: r.download_chapters,
                    merge_url: r.merge_url,
                    manga_url: r.manga_url,
                    manga_source: r.manga_source,
                })
                .collect();
        }

        if self.options.include_custom_info {
            backup.custom_info = self
                .repos
                .manga
                .get_custom_info(manga.id)
                .await?
                .map(|info| BackupCustomInfo {
                    title: info.title,
                    author: info.author,
                    artist: info.artist,
                    description: info.description,
                    genre: info.genre,
                    status: info.status,
                });
        }

        Ok(backup)
    }

    /// Writes a backup into `dir`. Automatic backups first delete old files
    /// so that at most `number_of_backups` remain afterwards.
    pub async fn write_backup(&self, dir: &Path, automatic: bool) -> Result<PathBuf, BackupError> {
        let backup = self.create_backup().await?;
        let data = codec::encode(&backup)?;

        tokio::fs::create_dir_all(dir).await?;
        if automatic {
            let keep = self.options.number_of_backups.saturating_sub(1);
            let dir = dir.to_path_buf();
            tokio::task::spawn_blocking(move || rotate_backups(&dir, keep))
                .await
                .map_err(anyhow::Error::from)??;
        }

        // a backup of the same minute is replaced
        let path = dir.join(backup_filename(Local::now()));
        let tmp_path = path.with_extension("tmp");
        {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(&tmp_path, &path).await?;

        info!(
            "wrote backup of {} manga to {}",
            backup.manga.len(),
            path.display()
        );

        Ok(path)
    }
}
