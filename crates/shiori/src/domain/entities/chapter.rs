use shiori_lib::prelude::ChapterInfo;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chapter {
    pub id: i64,
    pub manga_id: i64,
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

impl Chapter {
    pub fn is_recognized_number(&self) -> bool {
        self.chapter_number >= 0.0
    }

    pub fn to_chapter_info(&self) -> ChapterInfo {
        ChapterInfo {
            url: self.url.clone(),
            name: self.name.clone(),
            scanlator: self.scanlator.clone(),
            chapter_number: self.chapter_number,
            date_upload: self.date_upload,
        }
    }
}

impl From<ChapterInfo> for Chapter {
    fn from(ch: ChapterInfo) -> Self {
        Self {
            url: ch.url,
            name: ch.name,
            scanlator: ch.scanlator,
            chapter_number: ch.chapter_number,
            date_upload: ch.date_upload,
            date_fetch: chrono::Utc::now().timestamp_millis(),
            ..Default::default()
        }
    }
}
