use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::chapter::Chapter;

#[derive(Debug, Clone, PartialEq)]
pub struct Manga {
    pub id: i64,
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
    pub last_update: i64,
    pub date_added: i64,
    pub chapter_flags: ChapterFlags,
    pub cover_last_modified: i64,
    pub filtered_scanlators: Vec<String>,
    pub initialized: bool,
}

impl Default for Manga {
    fn default() -> Self {
        Self {
            id: 0,
            source: 0,
            url: "".to_string(),
            title: "".to_string(),
            artist: None,
            author: None,
            description: None,
            genre: vec![],
            status: 0,
            thumbnail_url: None,
            favorite: false,
            last_update: 0,
            date_added: 0,
            chapter_flags: ChapterFlags::default(),
            cover_last_modified: 0,
            filtered_scanlators: vec![],
            initialized: false,
        }
    }
}

impl Manga {
    pub fn is_scanlator_excluded(&self, chapter: &Chapter) -> bool {
        chapter
            .scanlator
            .as_ref()
            .is_some_and(|scanlator| self.filtered_scanlators.contains(scanlator))
    }

    /// Sorts chapters by the manga's configured sorting mode.
    pub fn sort_chapters(&self, chapters: &mut [Chapter], descending: bool) {
        let sorting = self.chapter_flags.sorting();
        chapters.sort_by(|a, b| {
            let ordering = match sorting {
                // source order 0 is the newest chapter
                ChapterSorting::Source => b.source_order.cmp(&a.source_order),
                ChapterSorting::Number => a
                    .chapter_number
                    .partial_cmp(&b.chapter_number)
                    .unwrap_or(Ordering::Equal),
                ChapterSorting::UploadDate => a.date_upload.cmp(&b.date_upload),
                ChapterSorting::Alphabet => {
                    human_sort::compare(&a.name.to_lowercase(), &b.name.to_lowercase())
                }
            };
            if descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
    }
}

/// Per-manga overrides edited by the user, shown instead of source data
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomMangaInfo {
    pub manga_id: i64,
    pub title: Option<String>,
    pub author: Option<String>,
    pub artist: Option<String>,
    pub description: Option<String>,
    pub genre: Option<Vec<String>>,
    pub status: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriState {
    Disabled,
    EnabledIs,
    EnabledNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChapterSorting {
    Source,
    Number,
    UploadDate,
    Alphabet,
}

/// Chapter list display settings packed into one integer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChapterFlags(pub i64);

impl ChapterFlags {
    pub const SORT_DESC: i64 = 0x0000_0000;
    pub const SORT_ASC: i64 = 0x0000_0001;
    pub const SORT_DIR_MASK: i64 = 0x0000_0001;

    pub const SHOW_UNREAD: i64 = 0x0000_0002;
    pub const SHOW_READ: i64 = 0x0000_0004;
    pub const UNREAD_MASK: i64 = 0x0000_0006;

    pub const SHOW_DOWNLOADED: i64 = 0x0000_0008;
    pub const SHOW_NOT_DOWNLOADED: i64 = 0x0000_0010;
    pub const DOWNLOADED_MASK: i64 = 0x0000_0018;

    pub const SHOW_BOOKMARKED: i64 = 0x0000_0020;
    pub const SHOW_NOT_BOOKMARKED: i64 = 0x0000_0040;
    pub const BOOKMARKED_MASK: i64 = 0x0000_0060;

    pub const SORTING_SOURCE: i64 = 0x0000_0000;
    pub const SORTING_NUMBER: i64 = 0x0000_0100;
    pub const SORTING_UPLOAD_DATE: i64 = 0x0000_0200;
    pub const SORTING_ALPHABET: i64 = 0x0000_0300;
    pub const SORTING_MASK: i64 = 0x0000_0300;

    pub const DISPLAY_NAME: i64 = 0x0000_0000;
    pub const DISPLAY_NUMBER: i64 = 0x0010_0000;
    pub const DISPLAY_MASK: i64 = 0x0010_0000;

    pub fn sort_descending(self) -> bool {
        self.0 & Self::SORT_DIR_MASK == Self::SORT_DESC
    }

    pub fn sorting(self) -> ChapterSorting {
        match self.0 & Self::SORTING_MASK {
            Self::SORTING_NUMBER => ChapterSorting::Number,
            Self::SORTING_UPLOAD_DATE => ChapterSorting::UploadDate,
            Self::SORTING_ALPHABET => ChapterSorting::Alphabet,
            _ => ChapterSorting::Source,
        }
    }

    pub fn display_number(self) -> bool {
        self.0 & Self::DISPLAY_MASK == Self::DISPLAY_NUMBER
    }

    pub fn unread_filter(self) -> TriState {
        Self::tri_state(self.0 & Self::UNREAD_MASK, Self::SHOW_UNREAD, Self::SHOW_READ)
    }

    pub fn downloaded_filter(self) -> TriState {
        Self::tri_state(
            self.0 & Self::DOWNLOADED_MASK,
            Self::SHOW_DOWNLOADED,
            Self::SHOW_NOT_DOWNLOADED,
        )
    }

    pub fn bookmarked_filter(self) -> TriState {
        Self::tri_state(
            self.0 & Self::BOOKMARKED_MASK,
            Self::SHOW_BOOKMARKED,
            Self::SHOW_NOT_BOOKMARKED,
        )
    }

    pub fn with_sorting(self, sorting: ChapterSorting, descending: bool) -> Self {
        let sorting = match sorting {
            ChapterSorting::Source => Self::SORTING_SOURCE,
            ChapterSorting::Number => Self::SORTING_NUMBER,
            ChapterSorting::UploadDate => Self::SORTING_UPLOAD_DATE,
            ChapterSorting::Alphabet => Self::SORTING_ALPHABET,
        };
        let direction = if descending {
            Self::SORT_DESC
        } else {
            Self::SORT_ASC
        };
        Self(self.0 & !(Self::SORTING_MASK | Self::SORT_DIR_MASK) | sorting | direction)
    }

    pub fn with_unread_filter(self, state: TriState) -> Self {
        self.with_tri_state(state, Self::UNREAD_MASK, Self::SHOW_UNREAD, Self::SHOW_READ)
    }

    pub fn with_downloaded_filter(self, state: TriState) -> Self {
        self.with_tri_state(
            state,
            Self::DOWNLOADED_MASK,
            Self::SHOW_DOWNLOADED,
            Self::SHOW_NOT_DOWNLOADED,
        )
    }

    pub fn with_bookmarked_filter(self, state: TriState) -> Self {
        self.with_tri_state(
            state,
            Self::BOOKMARKED_MASK,
            Self::SHOW_BOOKMARKED,
            Self::SHOW_NOT_BOOKMARKED,
        )
    }

    fn tri_state(value: i64, is: i64, not: i64) -> TriState {
        if value == is {
            TriState::EnabledIs
        } else if value == not {
            TriState::EnabledNot
        } else {
            TriState::Disabled
        }
    }

    fn with_tri_state(self, state: TriState, mask: i64, is: i64, not: i64) -> Self {
        let value = match state {
            TriState::Disabled => 0,
            TriState::EnabledIs => is,
            TriState::EnabledNot => not,
        };
        Self(self.0 & !mask | value)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn chapter(id: i64, name: &str, number: f64, source_order: i64) -> Chapter {
        Chapter {
            id,
            name: name.to_string(),
            chapter_number: number,
            source_order,
            ..Default::default()
        }
    }

    #[test]
    fn test_default_flags() {
        let flags = ChapterFlags::default();
        assert!(flags.sort_descending());
        assert_eq!(flags.sorting(), ChapterSorting::Source);
        assert_eq!(flags.unread_filter(), TriState::Disabled);
        assert_eq!(flags.downloaded_filter(), TriState::Disabled);
        assert_eq!(flags.bookmarked_filter(), TriState::Disabled);
        assert!(!flags.display_number());
    }

    #[test]
    fn test_filters_do_not_clobber_each_other() {
        let flags = ChapterFlags::default()
            .with_unread_filter(TriState::EnabledIs)
            .with_downloaded_filter(TriState::EnabledNot)
            .with_bookmarked_filter(TriState::EnabledIs)
            .with_sorting(ChapterSorting::Alphabet, false);

        assert_eq!(
            flags.0,
            ChapterFlags::SHOW_UNREAD
                | ChapterFlags::SHOW_NOT_DOWNLOADED
                | ChapterFlags::SHOW_BOOKMARKED
                | ChapterFlags::SORTING_ALPHABET
                | ChapterFlags::SORT_ASC
        );
        assert_eq!(flags.unread_filter(), TriState::EnabledIs);
        assert_eq!(flags.downloaded_filter(), TriState::EnabledNot);
        assert_eq!(flags.bookmarked_filter(), TriState::EnabledIs);
        assert_eq!(flags.sorting(), ChapterSorting::Alphabet);
        assert!(!flags.sort_descending());

        let flags = flags.with_unread_filter(TriState::Disabled);
        assert_eq!(flags.unread_filter(), TriState::Disabled);
        assert_eq!(flags.downloaded_filter(), TriState::EnabledNot);
    }

    #[test]
    fn test_sort_chapters_by_source_order() {
        let manga = Manga::default();
        let mut chapters = vec![chapter(1, "c3", 3.0, 0), chapter(2, "c1", 1.0, 2), chapter(3, "c2", 2.0, 1)];

        manga.sort_chapters(&mut chapters, false);
        let ids: Vec<i64> = chapters.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);

        manga.sort_chapters(&mut chapters, true);
        let ids: Vec<i64> = chapters.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 3, 2]);
    }

    #[test]
    fn test_sort_chapters_alphabetically_uses_natural_order() {
        let manga = Manga {
            chapter_flags: ChapterFlags::default().with_sorting(ChapterSorting::Alphabet, false),
            ..Default::default()
        };
        let mut chapters = vec![
            chapter(1, "Chapter 10", 10.0, 0),
            chapter(2, "Chapter 2", 2.0, 1),
            chapter(3, "chapter 1", 1.0, 2),
        ];

        manga.sort_chapters(&mut chapters, false);
        let ids: Vec<i64> = chapters.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn test_scanlator_exclusion() {
        let manga = Manga {
            filtered_scanlators: vec!["Bad Scans".to_string()],
            ..Default::default()
        };
        let excluded = Chapter {
            scanlator: Some("Bad Scans".to_string()),
            ..Default::default()
        };
        let kept = Chapter {
            scanlator: Some("Good Scans".to_string()),
            ..Default::default()
        };

        assert!(manga.is_scanlator_excluded(&excluded));
        assert!(!manga.is_scanlator_excluded(&kept));
        assert!(!manga.is_scanlator_excluded(&Chapter::default()));
    }
}
