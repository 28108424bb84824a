//! `items/<id>.json`: one file per item, the authoritative content store.

use crate::error::Result;
use crate::model::MemoryItem;
use crate::store::atomic::{read_json_lenient, write_json_atomic};
use std::path::{Path, PathBuf};

pub struct ItemFiles {
    dir: PathBuf,
    tmp_dir: PathBuf,
}

impl ItemFiles {
    pub fn new(scope_dir: &Path) -> Self {
        Self {
            dir: scope_dir.join("items"),
            tmp_dir: scope_dir.join("tmp"),
        }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Stage-and-rename write of one item file.
    pub fn write(&self, item: &MemoryItem) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        write_json_atomic(&self.tmp_dir, &self.path_for(&item.id), item)
    }

    /// The item file is authoritative for content; the catalog is never
    /// consulted here.
    pub fn read(&self, id: &str) -> Option<MemoryItem> {
        read_json_lenient(&self.path_for(id))
    }

    /// Idempotent: returns whether a file actually existed before removal.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let path = self.path_for(id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Enumerate all item ids currently on disk, used by `rebuildCatalog`
    /// and full replay.
    pub fn list_ids(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let path = e.path();
                if path.extension().and_then(|s| s.to_str()) != Some("json") {
                    return None;
                }
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .map(|s| s.to_string())
            })
            .collect()
    }

    /// All items currently on disk, parsed (corrupt files are skipped).
    pub fn list_all(&self) -> Vec<MemoryItem> {
        self.list_ids()
            .into_iter()
            .filter_map(|id| self.read(&id))
            .collect()
    }
}
