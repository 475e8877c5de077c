use serde::{Deserialize, Serialize};

/// A type represent chapter, normalized across source
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ChapterInfo {
    pub url: String,
    pub name: String,
    pub scanlator: Option<String>,
    pub chapter_number: f64,
    pub date_upload: i64,
}
