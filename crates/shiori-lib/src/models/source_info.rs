use serde::{Deserialize, Serialize};

/// How a source produces chapters. The reader and downloader branch on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum SourceKind {
    /// Catalogue served over HTTP, pages are fetched from the network
    Http,
    /// Folder of archives and directories on the local filesystem
    Local,
    /// Virtual manga aggregating chapters from other sources
    Merged,
    /// Source referenced by the library but not installed
    Stub,
}

/// A type represent source
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SourceInfo {
    pub id: i64,
    pub name: String,
    pub lang: String,
    pub kind: SourceKind,
}

impl SourceInfo {
    /// Name used for the source download directory, e.g. `MangaDex (EN)`
    pub fn display_name(&self) -> String {
        if self.lang.is_empty() {
            self.name.clone()
        } else {
            format!("{} ({})", self.name, self.lang.to_uppercase())
        }
    }
}
