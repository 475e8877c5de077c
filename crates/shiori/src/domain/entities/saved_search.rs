#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SavedSearch {
    pub id: i64,
    pub source: i64,
    pub name: String,
    pub query: Option<String>,
    pub filters_json: Option<String>,
}
