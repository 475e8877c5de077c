use std::{
    collections::HashMap,
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadObject {
    pub manga_id: i64,
    pub chapter_id: i64,
    pub order: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    counter: u64,
    downloads: HashMap<i64, DownloadObject>,
}

/// Pending downloads mirrored to disk so the queue survives a restart.
///
/// Every mutation rewrites the file atomically. The store may lag behind the
/// in-memory queue, it is only read back at startup.
#[derive(Debug)]
pub struct DownloadStore {
    path: PathBuf,
    data: Mutex<StoreData>,
}

impl DownloadStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let data = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!("discarding unreadable download store {}: {e}", path.display());
                StoreData::default()
            }),
            Err(_) => StoreData::default(),
        };

        Self {
            path,
            data: Mutex::new(data),
        }
    }

    /// Appends the downloads keeping the order they are given in
    pub fn add_all(&self, downloads: &[(i64, i64)]) {
        self.update(|data| {
            for &(manga_id, chapter_id) in downloads {
                let order = data.counter;
                data.counter += 1;
                data.downloads.insert(
                    chapter_id,
                    DownloadObject {
                        manga_id,
                        chapter_id,
                        order,
                    },
                );
            }
        });
    }

    pub fn remove_all(&self, chapter_ids: &[i64]) {
        self.update(|data| {
            for chapter_id in chapter_ids {
                data.downloads.remove(chapter_id);
            }
        });
    }

    pub fn clear(&self) {
        self.update(|data| {
            data.downloads.clear();
            data.counter = 0;
        });
    }

    /// Stored downloads in the order they were queued
    pub fn restore(&self) -> Vec<DownloadObject> {
        let Ok(data) = self.data.lock() else {
            return vec![];
        };
        let mut downloads: Vec<DownloadObject> = data.downloads.values().copied().collect();
        downloads.sort_by_key(|d| d.order);
        downloads
    }

    pub fn len(&self) -> usize {
        self.data.lock().map_or(0, |data| data.downloads.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn update(&self, f: impl FnOnce(&mut StoreData)) {
        let Ok(mut data) = self.data.lock() else {
            return;
        };
        f(&mut data);
        if let Err(e) = self.write(&data) {
            error!("failed to write download store {}: {e}", self.path.display());
        }
    }

    fn write(&self, data: &StoreData) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec(data)?;

        let tmp_path = self.path.with_extension("tmp");
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        std::fs::rename(&tmp_path, &self.path)?;

        Ok(())
    }
}
