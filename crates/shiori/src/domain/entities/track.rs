#[derive(Debug, Clone, Default, PartialEq)]
pub struct Track {
    pub id: i64,
    pub manga_id: i64,
    /// id of the tracking service
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

/// A tracker update that failed and waits for the retry worker
#[derive(Debug, Clone, PartialEq)]
pub struct DelayedTrackingUpdate {
    pub track_id: i64,
    pub last_chapter_read: f64,
}
