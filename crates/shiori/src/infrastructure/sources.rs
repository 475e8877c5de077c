use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use shiori_lib::prelude::{HttpSource, Source, SourceInfo, SourceKind};

use super::local::{LOCAL_SOURCE_ID, LocalSource};
use crate::domain::entities::merged::MERGED_SOURCE_ID;

/// A source that is referenced by the library but not installed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubSource {
    pub id: i64,
    pub name: String,
}

impl Source for StubSource {
    fn get_source_info(&self) -> SourceInfo {
        SourceInfo {
            id: self.id,
            name: self.name.clone(),
            lang: String::new(),
            kind: SourceKind::Stub,
        }
    }
}

#[derive(Clone)]
pub enum SourceHandle {
    Http(Arc<dyn HttpSource>),
    Local(Arc<LocalSource>),
    Merged,
    Stub(StubSource),
}

impl SourceHandle {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceHandle::Http(_) => SourceKind::Http,
            SourceHandle::Local(_) => SourceKind::Local,
            SourceHandle::Merged => SourceKind::Merged,
            SourceHandle::Stub(_) => SourceKind::Stub,
        }
    }

    pub fn info(&self) -> SourceInfo {
        match self {
            SourceHandle::Http(source) => source.get_source_info(),
            SourceHandle::Local(source) => source.get_source_info(),
            SourceHandle::Merged => SourceInfo {
                id: MERGED_SOURCE_ID,
                name: "MergedSource".to_string(),
                lang: String::new(),
                kind: SourceKind::Merged,
            },
            SourceHandle::Stub(source) => source.get_source_info(),
        }
    }

    pub fn as_http(&self) -> Option<Arc<dyn HttpSource>> {
        match self {
            SourceHandle::Http(source) => Some(source.clone()),
            _ => None,
        }
    }
}

/// Registry of installed sources. Unknown ids resolve to a [`StubSource`].
pub struct SourceManager {
    local: Arc<LocalSource>,
    sources: RwLock<HashMap<i64, Arc<dyn HttpSource>>>,
    stub_names: RwLock<HashMap<i64, String>>,
}

impl SourceManager {
    pub fn new(local: LocalSource) -> Self {
        Self {
            local: Arc::new(local),
            sources: RwLock::new(HashMap::new()),
            stub_names: RwLock::new(HashMap::new()),
        }
    }

    pub fn install(&self, source: Arc<dyn HttpSource>) {
        let id = source.id();
        info!("install source {} ({id})", source.get_source_info().name);
        if let Ok(mut sources) = self.sources.write() {
            sources.insert(id, source);
        }
    }

    /// Remembers the name of a source that is not installed, e.g. from a backup
    pub fn register_stub(&self, id: i64, name: String) {
        if let Ok(mut names) = self.stub_names.write() {
            names.entry(id).or_insert(name);
        }
    }

    pub fn get(&self, id: i64) -> SourceHandle {
        if id == LOCAL_SOURCE_ID {
            return SourceHandle::Local(self.local.clone());
        }
        if id == MERGED_SOURCE_ID {
            return SourceHandle::Merged;
        }
        if let Some(source) = self.get_http(id) {
            return SourceHandle::Http(source);
        }

        let name = self
            .stub_names
            .read()
            .ok()
            .and_then(|names| names.get(&id).cloned())
            .unwrap_or_else(|| id.to_string());
        SourceHandle::Stub(StubSource { id, name })
    }

    pub fn get_http(&self, id: i64) -> Option<Arc<dyn HttpSource>> {
        self.sources.read().ok()?.get(&id).cloned()
    }

    pub fn local(&self) -> Arc<LocalSource> {
        self.local.clone()
    }

    pub fn is_installed(&self, id: i64) -> bool {
        id == LOCAL_SOURCE_ID
            || id == MERGED_SOURCE_ID
            || self
                .sources
                .read()
                .is_ok_and(|sources| sources.contains_key(&id))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_unknown_source_is_stub() {
        let manager = SourceManager::new(LocalSource::new("."));

        assert_eq!(manager.get(LOCAL_SOURCE_ID).kind(), SourceKind::Local);
        assert_eq!(manager.get(MERGED_SOURCE_ID).kind(), SourceKind::Merged);

        let handle = manager.get(1234);
        assert_eq!(handle.kind(), SourceKind::Stub);
        assert_eq!(handle.info().name, "1234");
        assert!(!manager.is_installed(1234));

        manager.register_stub(1234, "MangaDex".to_string());
        assert_eq!(manager.get(1234).info().name, "MangaDex");
    }
}
