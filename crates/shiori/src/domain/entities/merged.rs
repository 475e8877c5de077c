/// Source id of the virtual merged source
pub const MERGED_SOURCE_ID: i64 = 6969;

/// Links a merged manga to one of the manga it aggregates.
///
/// The merged manga itself has a reference to itself with `manga_source`
/// equal to [`MERGED_SOURCE_ID`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedMangaReference {
    pub id: i64,
    pub is_info_manga: bool,
    pub get_chapter_updates: bool,
    pub chapter_sort_mode: i64,
    pub chapter_priority: i64,
    pub download_chapters: bool,
    pub merge_id: i64,
    pub merge_url: String,
    pub manga_id: Option<i64>,
    pub manga_url: String,
    pub manga_source: i64,
}
