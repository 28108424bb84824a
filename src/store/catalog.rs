//! `catalog.json`: the compact, search-oriented projection of on-disk items.

use crate::error::Result;
use crate::model::{Catalog, MemoryItemSummary};
use crate::store::atomic::{read_json_lenient, write_json_atomic};
use crate::store::lock;
use std::path::{Path, PathBuf};

pub struct CatalogStore {
    path: PathBuf,
    locks_dir: PathBuf,
    tmp_dir: PathBuf,
}

impl CatalogStore {
    pub fn new(scope_dir: &Path) -> Self {
        Self {
            path: scope_dir.join("catalog.json"),
            locks_dir: scope_dir.join("locks"),
            tmp_dir: scope_dir.join("tmp"),
        }
    }

    /// Lock-free read; returns `{}` on a missing or corrupt file.
    pub fn read(&self) -> Catalog {
        read_json_lenient(&self.path).unwrap_or_default()
    }

    /// Replace the whole catalog atomically, under the `catalog` lock.
    pub fn write(&self, catalog: &Catalog) -> Result<()> {
        let _guard = lock::acquire(&self.locks_dir, "catalog")?;
        write_json_atomic(&self.tmp_dir, &self.path, catalog)
    }

    /// Upsert one summary into the catalog under lock (read-modify-write).
    pub fn upsert(&self, summary: MemoryItemSummary) -> Result<()> {
        let _guard = lock::acquire(&self.locks_dir, "catalog")?;
        let mut catalog = read_json_lenient::<Catalog>(&self.path).unwrap_or_default();
        catalog.insert(summary.id.clone(), summary);
        write_json_atomic(&self.tmp_dir, &self.path, &catalog)
    }

    /// Remove one id from the catalog under lock; idempotent.
    pub fn remove(&self, id: &str) -> Result<()> {
        let _guard = lock::acquire(&self.locks_dir, "catalog")?;
        let mut catalog = read_json_lenient::<Catalog>(&self.path).unwrap_or_default();
        catalog.remove(id);
        write_json_atomic(&self.tmp_dir, &self.path, &catalog)
    }
}
