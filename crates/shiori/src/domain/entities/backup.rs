use serde::{Deserialize, Serialize};

/// Snapshot of the whole library, written as a gzip compressed binary file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    pub manga: Vec<BackupManga>,
    pub categories: Vec<BackupCategory>,
    pub sources: Vec<BackupSource>,
    pub saved_searches: Vec<BackupSavedSearch>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupManga {
    pub source: i64,
    pub url: String,
    pub title: String,
    pub artist: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
    pub genre: Vec<String>,
    pub status: i64,
    pub thumbnail_url: Option<String>,
    pub favorite: bool,
    pub date_added: i64,
    pub chapter_flags: i64,
    pub filtered_scanlators: Vec<String>,
    pub chapters: Vec<BackupChapter>,
    /// `order` of every [`BackupCategory`] the manga belongs to
    pub categories: Vec<i64>,
    pub history: Vec<BackupHistory>,
    pub tracking: Vec<BackupTracking>,
    pub merged_references: Vec<BackupMergedMangaReference>,
    pub custom_info: Option<BackupCustomInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupCategory {
    pub name: String,
    pub order: i64,
    pub flags: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupChapter {
    pub url: String,
    pub name: String,
    pub scanlator: Option<String>,
    pub read: bool,
    pub bookmark: bool,
    pub last_page_read: i64,
    pub chapter_number: f64,
    pub source_order: i64,
    pub date_fetch: i64,
    pub date_upload: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupHistory {
    /// url of the chapter the entry belongs to
    pub url: String,
    pub last_read: i64,
    pub read_duration: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupTracking {
    pub sync_id: i64,
    pub remote_id: i64,
    pub library_id: Option<i64>,
    pub title: String,
    pub last_chapter_read: f64,
    pub total_chapters: i64,
    pub status: i64,
    pub score: f64,
    pub remote_url: String,
    pub start_date: i64,
    pub finish_date: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSavedSearch {
    pub source: i64,
    pub name: String,
    pub query: Option<String>,
    pub filters_json: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMergedMangaReference {
    pub is_info_manga: bool,
    pub get_chapter_updates: bool,
    pub chapter_sort_mode: i64,
    pub chapter_priority: i64,
    pub download_chapters: bool,
    pub merge_url: String,
    pub manga_url: String,
    pub manga_source: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupCustomInfo {
    pub title: Option<String>,
    pub author: Option<String>,
    pub artist: Option<String>,
    pub description: Option<String>,
    pub genre: Option<Vec<String>>,
    pub status: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSource {
    pub name: String,
    pub source_id: i64,
}
