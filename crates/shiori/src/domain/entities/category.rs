#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub sort: i64,
    pub flags: i64,
}
