use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::Arc,
};

use super::{BackupError, codec};
use crate::{
    domain::{
        entities::{
            backup::{Backup, BackupCategory, BackupChapter, BackupManga, BackupMergedMangaReference},
            category::Category,
            chapter::Chapter,
            history::History,
            manga::{ChapterFlags, CustomMangaInfo, Manga},
            merged::{MERGED_SOURCE_ID, MergedMangaReference},
            saved_search::SavedSearch,
            track::Track,
        },
        repositories::Repositories,
    },
    infrastructure::sources::SourceManager,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestoreReport {
    pub restored: usize,
    /// title of the manga and what went wrong
    pub errors: Vec<(String, String)>,
    /// names of sources used by the backup that are not installed
    pub missing_sources: Vec<String>,
}

/// Restores a backup on top of the current library. Existing entries are
/// merged so that restoring the same backup again changes nothing.
pub struct BackupRestorer {
    repos: Repositories,
    sources: Arc<SourceManager>,
}

impl BackupRestorer {
    pub fn new(repos: Repositories, sources: Arc<SourceManager>) -> Self {
        Self { repos, sources }
    }

    pub async fn restore_file(&self, path: &Path) -> Result<RestoreReport, BackupError> {
        let data = tokio::fs::read(path).await?;
        let backup = codec::decode(&data)?;
        self.restore(&backup).await
    }

    pub async fn restore(&self, backup: &Backup) -> Result<RestoreReport, BackupError> {
        let mut report = RestoreReport::default();

        for source in &backup.sources {
            self.sources.register_stub(source.source_id, source.name.clone());
            if !self.sources.is_installed(source.source_id) {
                report.missing_sources.push(source.name.clone());
            }
        }

        let categories = self.restore_categories(&backup.categories).await?;
        self.restore_saved_searches(backup).await?;

        let mut references = vec![];
        for manga in &backup.manga {
            match self.restore_manga(manga, &categories).await {
                Ok(manga_id) => {
                    report.restored += 1;
                    references.extend(manga.merged_references.iter().map(|r| (manga_id, r)));
                }
                Err(e) => {
                    error!("failed to restore {}: {e}", manga.title);
                    report.errors.push((manga.title.clone(), e.to_string()));
                }
            }
        }

        // the entries of a merged manga may come after it in the backup
        for (merge_id, reference) in references {
            if let Err(e) = self.restore_merged_reference(merge_id, reference).await {
                error!("failed to restore merged reference {}: {e}", reference.manga_url);
                report
                    .errors
                    .push((reference.manga_url.clone(), e.to_string()));
            }
        }

        info!(
            "restored {} manga, {} errors",
            report.restored,
            report.errors.len()
        );

        Ok(report)
    }

    /// Returns the local category id of every backup category order
    async fn restore_categories(
        &self,
        categories: &[BackupCategory],
    ) -> Result<HashMap<i64, i64>, BackupError> {
        let mut existing = self.repos.category.get_categories().await?;
        let mut next_sort = existing.iter().map(|c| c.sort).max().unwrap_or(-1) + 1;

        let mut ids = HashMap::new();
        for category in categories {
            let id = match existing.iter().find(|c| c.name == category.name) {
                Some(c) => c.id,
                None => {
                    let mut new = Category {
                        id: 0,
                        name: category.name.clone(),
                        sort: next_sort,
                        flags: category.flags,
                    };
                    next_sort += 1;
                    new.id = self.repos.category.insert_category(&new).await?;
                    let id = new.id;
                    existing.push(new);
                    id
                }
            };
            ids.insert(category.order, id);
        }

        Ok(ids)
    }

    async fn restore_saved_searches(&self, backup: &Backup) -> Result<(), BackupError> {
        for search in &backup.saved_searches {
            self.repos
                .saved_search
                .insert_saved_search(&SavedSearch {
                    id: 0,
                    source: search.source,
                    name: search.name.clone(),
                    query: search.query.clone(),
                    filters_json: search.filters_json.clone(),
                })
                .await?;
        }
        Ok(())
    }

    async fn restore_manga(
        &self,
        backup: &BackupManga,
        categories: &HashMap<i64, i64>,
    ) -> Result<i64, BackupError> {
        let manga_id = match self
            .repos
            .manga
            .get_manga_by_source_url(backup.source, &backup.url)
            .await?
        {
            Some(existing) => {
                let merged = merge_manga(existing, backup);
                self.repos.manga.update_manga(&merged).await?;
                merged.id
            }
            None => self.repos.manga.insert_manga(&new_manga(backup)).await?,
        };

        self.restore_chapters(manga_id, &backup.chapters).await?;

        let category_ids: Vec<i64> = backup
            .categories
            .iter()
            .filter_map(|order| categories.get(order).copied())
            .collect();
        if !category_ids.is_empty() {
            self.repos
                .category
                .add_manga_to_categories(manga_id, &category_ids)
                .await?;
        }

        if !backup.history.is_empty() {
            let chapters: HashMap<String, i64> = self
                .repos
                .chapter
                .get_chapters_by_manga_id(manga_id)
                .await?
                .into_iter()
                .map(|c| (c.url, c.id))
                .collect();
            for history in &backup.history {
                let Some(chapter_id) = chapters.get(&history.url) else {
                    continue;
                };
                self.repos
                    .history
                    .upsert_history(&History {
                        id: 0,
                        chapter_id: *chapter_id,
                        last_read: history.last_read,
                        time_read: history.read_duration,
                    })
                    .await?;
            }
        }

        self.restore_tracking(manga_id, backup).await?;

        if let Some(info) = &backup.custom_info {
            self.repos
                .manga
                .set_custom_info(&CustomMangaInfo {
                    manga_id,
                    title: info.title.clone(),
                    author: info.author.clone(),
                    artist: info.artist.clone(),
                    description: info.description.clone(),
                    genre: info.genre.clone(),
                    status: info.status,
                })
                .await?;
        }

        Ok(manga_id)
    }

    async fn restore_chapters(
        &self,
        manga_id: i64,
        chapters: &[BackupChapter],
    ) -> Result<(), BackupError> {
        let existing: HashMap<String, Chapter> = self
            .repos
            .chapter
            .get_chapters_by_manga_id(manga_id)
            .await?
            .into_iter()
            .map(|c| (c.url.clone(), c))
            .collect();

        let mut seen = HashSet::new();
        for chapter in chapters {
            if !seen.insert(chapter.url.as_str()) {
                continue;
            }
            match existing.get(&chapter.url) {
                Some(current) => {
                    let merged = merge_chapter(current, chapter);
                    if merged != *current {
                        self.repos.chapter.update_chapter(&merged).await?;
                    }
                }
                None => {
                    self.repos
                        .chapter
                        .insert_chapter(&Chapter {
                            id: 0,
                            manga_id,
                            url: chapter.url.clone(),
                            name: chapter.name.clone(),
                            scanlator: chapter.scanlator.clone(),
                            read: chapter.read,
                            bookmark: chapter.bookmark,
                            last_page_read: chapter.last_page_read,
                            chapter_number: chapter.chapter_number,
                            source_order: chapter.source_order,
                            date_fetch: chapter.date_fetch,
                            date_upload: chapter.date_upload,
                        })
                        .await?;
                }
            }
        }

        Ok(())
    }

    async fn restore_tracking(&self, manga_id: i64, backup: &BackupManga) -> Result<(), BackupError> {
        if backup.tracking.is_empty() {
            return Ok(());
        }

        let existing = self.repos.track.get_tracks_by_manga_id(manga_id).await?;
        for track in &backup.tracking {
            let restored = match existing.iter().find(|t| t.sync_id == track.sync_id) {
                Some(current) if current.last_chapter_read >= track.last_chapter_read => continue,
                Some(current) => Track {
                    last_chapter_read: track.last_chapter_read,
                    ..current.clone()
                },
                None => Track {
                    id: 0,
                    manga_id,
                    sync_id: track.sync_id,
                    remote_id: track.remote_id,
                    library_id: track.library_id,
                    title: track.title.clone(),
                    last_chapter_read: track.last_chapter_read,
                    total_chapters: track.total_chapters,
                    status: track.status,
                    score: track.score,
                    remote_url: track.remote_url.clone(),
                    start_date: track.start_date,
                    finish_date: track.finish_date,
                },
            };
            self.repos.track.upsert_track(&restored).await?;
        }

        Ok(())
    }

    async fn restore_merged_reference(
        &self,
        merge_id: i64,
        reference: &BackupMergedMangaReference,
    ) -> Result<(), BackupError> {
        let manga_id = if reference.manga_source == MERGED_SOURCE_ID {
            Some(merge_id)
        } else {
            self.repos
                .manga
                .get_manga_by_source_url(reference.manga_source, &reference.manga_url)
                .await?
                .map(|m| m.id)
        };

        self.repos
            .merged
            .insert_reference(&MergedMangaReference {
                id: 0,
                is_info_manga: reference.is_info_manga,
                get_chapter_updates: reference.get_chapter_updates,
                chapter_sort_mode: reference.chapter_sort_mode,
                chapter_priority: reference.chapter_priority,
                download_chapters: reference.download_chapters,
                merge_id,
                merge_url: reference.merge_url.clone(),
                manga_id,
                manga_url: reference.manga_url.clone(),
                manga_source: reference.manga_source,
            })
            .await?;

        Ok(())
    }
}

fn new_manga(backup: &BackupManga) -> Manga {
    Manga {
        source: backup.source,
        url: backup.url.clone(),
        title: backup.title.clone(),
        artist: backup.artist.clone(),
        author: backup.author.clone(),
        description: backup.description.clone(),
        genre: backup.genre.clone(),
        status: backup.status,
        thumbnail_url: backup.thumbnail_url.clone(),
        favorite: backup.favorite,
        date_added: backup.date_added,
        chapter_flags: ChapterFlags(backup.chapter_flags),
        filtered_scanlators: backup.filtered_scanlators.clone(),
        ..Default::default()
    }
}

/// Local metadata wins when present, settings come from the backup
fn merge_manga(existing: Manga, backup: &BackupManga) -> Manga {
    let date_added = match (existing.date_added, backup.date_added) {
        (0, b) => b,
        (a, 0) => a,
        (a, b) => a.min(b),
    };
    Manga {
        artist: existing.artist.or_else(|| backup.artist.clone()),
        author: existing.author.or_else(|| backup.author.clone()),
        description: existing.description.or_else(|| backup.description.clone()),
        genre: if existing.genre.is_empty() {
            backup.genre.clone()
        } else {
            existing.genre
        },
        thumbnail_url: existing
            .thumbnail_url
            .or_else(|| backup.thumbnail_url.clone()),
        favorite: existing.favorite || backup.favorite,
        date_added,
        chapter_flags: ChapterFlags(backup.chapter_flags),
        filtered_scanlators: backup.filtered_scanlators.clone(),
        ..existing
    }
}

/// Read and bookmark flags are never cleared and the page of the side that
/// got further is kept
fn merge_chapter(existing: &Chapter, backup: &BackupChapter) -> Chapter {
    let last_page_read = if existing.read && !backup.read {
        existing.last_page_read
    } else if backup.read && !existing.read {
        backup.last_page_read
    } else {
        existing.last_page_read.max(backup.last_page_read)
    };

    Chapter {
        read: existing.read || backup.read,
        bookmark: existing.bookmark || backup.bookmark,
        last_page_read,
        ..existing.clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        application::backup::BackupCreator,
        domain::entities::backup::{
            BackupCustomInfo, BackupHistory, BackupSavedSearch, BackupSource, BackupTracking,
        },
        infrastructure::{
            config::BackupConfig, database::establish_memory_connection,
            domain::repositories::repositories, local::LocalSource,
        },
        test_util::FakeSource,
    };

    async fn setup() -> (tempfile::TempDir, Repositories, Arc<SourceManager>) {
        let dir = tempfile::tempdir().unwrap();
        let repos = repositories(establish_memory_connection().await.unwrap());
        let sources = Arc::new(SourceManager::new(LocalSource::new(dir.path())));
        sources.install(Arc::new(FakeSource::new(1, 1)));
        (dir, repos, sources)
    }

    fn sample_backup() -> Backup {
        Backup {
            manga: vec![
                BackupManga {
                    source: MERGED_SOURCE_ID,
                    url: "/merged".to_string(),
                    title: "Merged".to_string(),
                    favorite: true,
                    merged_references: vec![
                        BackupMergedMangaReference {
                            is_info_manga: false,
                            merge_url: "/merged".to_string(),
                            manga_url: "/merged".to_string(),
                            manga_source: MERGED_SOURCE_ID,
                            ..Default::default()
                        },
                        BackupMergedMangaReference {
                            is_info_manga: true,
                            download_chapters: true,
                            merge_url: "/merged".to_string(),
                            manga_url: "/manga/1".to_string(),
                            manga_source: 1,
                            ..Default::default()
                        },
                    ],
                    ..Default::default()
                },
                BackupManga {
                    source: 1,
                    url: "/manga/1".to_string(),
                    title: "Title".to_string(),
                    favorite: true,
                    genre: vec!["Action".to_string()],
                    categories: vec![4],
                    chapters: vec![
                        BackupChapter {
                            url: "/chapter/1".to_string(),
                            name: "Chapter 1".to_string(),
                            read: true,
                            last_page_read: 19,
                            chapter_number: 1.0,
                            source_order: 1,
                            ..Default::default()
                        },
                        BackupChapter {
                            url: "/chapter/2".to_string(),
                            name: "Chapter 2".to_string(),
                            last_page_read: 5,
                            chapter_number: 2.0,
                            ..Default::default()
                        },
                    ],
                    history: vec![BackupHistory {
                        url: "/chapter/1".to_string(),
                        last_read: 1000,
                        read_duration: 60,
                    }],
                    tracking: vec![BackupTracking {
                        sync_id: 2,
                        remote_id: 42,
                        last_chapter_read: 1.0,
                        ..Default::default()
                    }],
                    custom_info: Some(BackupCustomInfo {
                        title: Some("Custom".to_string()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                BackupManga {
                    source: 77,
                    url: "/manga/77".to_string(),
                    title: "Elsewhere".to_string(),
                    favorite: true,
                    ..Default::default()
                },
            ],
            categories: vec![BackupCategory {
                name: "Reading".to_string(),
                order: 4,
                flags: 0,
            }],
            sources: vec![
                BackupSource {
                    name: "Source 1".to_string(),
                    source_id: 1,
                },
                BackupSource {
                    name: "Gone".to_string(),
                    source_id: 77,
                },
            ],
            saved_searches: vec![BackupSavedSearch {
                source: 1,
                name: "Popular".to_string(),
                query: Some("sort=popular".to_string()),
                filters_json: None,
            }],
        }
    }

    #[tokio::test]
    async fn test_restore_twice_is_idempotent() {
        let (_dir, repos, sources) = setup().await;
        let restorer = BackupRestorer::new(repos.clone(), sources.clone());
        let backup = sample_backup();

        let report = restorer.restore(&backup).await.unwrap();
        assert_eq!(report.restored, 3);
        assert!(report.errors.is_empty());
        assert_eq!(report.missing_sources, vec!["Gone".to_string()]);
        assert_eq!(sources.get(77).info().name, "Gone");

        let creator = BackupCreator::new(repos.clone(), sources.clone(), BackupConfig::default());
        let first = creator.create_backup().await.unwrap();

        let report = restorer.restore(&backup).await.unwrap();
        assert_eq!(report.restored, 3);
        let second = creator.create_backup().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(repos.category.get_categories().await.unwrap().len(), 1);
        assert_eq!(repos.manga.get_favorites().await.unwrap().len(), 3);
        assert_eq!(repos.saved_search.get_saved_searches().await.unwrap().len(), 1);

        let title = repos
            .manga
            .get_manga_by_source_url(1, "/manga/1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            repos.chapter.get_chapters_by_manga_id(title.id).await.unwrap().len(),
            2
        );
        assert_eq!(
            repos
                .manga
                .get_custom_info(title.id)
                .await
                .unwrap()
                .and_then(|i| i.title),
            Some("Custom".to_string())
        );

        let merged = repos
            .manga
            .get_manga_by_source_url(MERGED_SOURCE_ID, "/merged")
            .await
            .unwrap()
            .unwrap();
        let references = repos.merged.get_references_by_merge_id(merged.id).await.unwrap();
        assert_eq!(references.len(), 2);
        assert!(references.iter().any(|r| r.manga_id == Some(title.id)));
        assert!(references.iter().any(|r| r.manga_id == Some(merged.id)));
    }

    #[tokio::test]
    async fn test_more_progress_wins() {
        let (_dir, repos, sources) = setup().await;
        let mut manga = Manga {
            source: 1,
            url: "/manga/1".to_string(),
            title: "Title".to_string(),
            ..Default::default()
        };
        manga.id = repos.manga.insert_manga(&manga).await.unwrap();
        let mut local = Chapter {
            manga_id: manga.id,
            url: "/chapter/2".to_string(),
            name: "Chapter 2".to_string(),
            bookmark: true,
            last_page_read: 12,
            ..Default::default()
        };
        local.id = repos.chapter.insert_chapter(&local).await.unwrap();
        repos
            .track
            .upsert_track(&Track {
                manga_id: manga.id,
                sync_id: 2,
                last_chapter_read: 7.0,
                ..Default::default()
            })
            .await
            .unwrap();
        repos
            .history
            .upsert_history(&History {
                id: 0,
                chapter_id: local.id,
                last_read: 5000,
                time_read: 10,
            })
            .await
            .unwrap();

        let mut backup = sample_backup();
        backup.manga[1].history.push(BackupHistory {
            url: "/chapter/2".to_string(),
            last_read: 100,
            read_duration: 300,
        });
        let restorer = BackupRestorer::new(repos.clone(), sources);
        restorer.restore(&backup).await.unwrap();

        let restored = repos.manga.get_manga_by_id(manga.id).await.unwrap();
        assert!(restored.favorite);
        assert_eq!(restored.genre, vec!["Action".to_string()]);

        let chapters = repos.chapter.get_chapters_by_manga_id(manga.id).await.unwrap();
        let chapter_2 = chapters.iter().find(|c| c.url == "/chapter/2").unwrap();
        assert!(chapter_2.bookmark);
        assert!(!chapter_2.read);
        assert_eq!(chapter_2.last_page_read, 12);
        let chapter_1 = chapters.iter().find(|c| c.url == "/chapter/1").unwrap();
        assert!(chapter_1.read);
        assert_eq!(chapter_1.last_page_read, 19);

        let tracks = repos.track.get_tracks_by_manga_id(manga.id).await.unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].last_chapter_read, 7.0);

        let history = repos
            .history
            .get_history_by_chapter_id(local.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(history.last_read, 5000);
        assert_eq!(history.time_read, 300);
    }

    #[test]
    fn test_merge_chapter() {
        let existing = Chapter {
            read: true,
            last_page_read: 3,
            ..Default::default()
        };
        let backup = BackupChapter {
            bookmark: true,
            last_page_read: 10,
            ..Default::default()
        };
        let merged = merge_chapter(&existing, &backup);
        assert!(merged.read);
        assert!(merged.bookmark);
        assert_eq!(merged.last_page_read, 3);

        let existing = Chapter {
            last_page_read: 3,
            ..Default::default()
        };
        assert_eq!(merge_chapter(&existing, &backup).last_page_read, 10);
    }
}
