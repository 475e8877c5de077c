#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct History {
    pub id: i64,
    pub chapter_id: i64,
    /// epoch millis of the last time the chapter was opened
    pub last_read: i64,
    /// accumulated reading time in millis
    pub time_read: i64,
}
