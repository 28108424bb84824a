//! Per-scope durable item storage: journal-first writes, atomic item files,
//! catalog materialization, snapshot/state markers, crash recovery, and
//! compaction.

pub mod atomic;
pub mod catalog;
pub mod items;
pub mod journal;
pub mod lock;
pub mod snapshot;

use crate::error::{Error, Result};
use crate::model::{
    Catalog, JournalEntry, JournalOp, MemoryItem, Sensitivity, SnapshotMeta, StateOk,
};
use catalog::CatalogStore;
use chrono::Utc;
use items::ItemFiles;
use journal::Journal;
use snapshot::{compute_checksum, SnapshotStore};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

/// The per-scope durable store: the composition of journal, item files,
/// catalog, and snapshot/state markers.
pub struct Store {
    dir: PathBuf,
    journal: Journal,
    catalog: CatalogStore,
    items: ItemFiles,
    snapshot: SnapshotStore,
    appends_since_compaction: AtomicU64,
}

/// Outcome of [`Store::write_item`]: whether the append threshold for
/// scheduling compaction has now been reached.
pub struct WriteOutcome {
    pub should_compact: bool,
}

impl Store {
    pub fn new(scope_dir: impl Into<PathBuf>) -> Self {
        let dir = scope_dir.into();
        Self {
            journal: Journal::new(&dir),
            catalog: CatalogStore::new(&dir),
            items: ItemFiles::new(&dir),
            snapshot: SnapshotStore::new(&dir),
            dir,
            appends_since_compaction: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn index_dir(&self) -> PathBuf {
        self.dir.join("index")
    }

    /// Journal-first write: append the upsert, then stage-and-rename the
    /// item file, then upsert the catalog entry under lock. `sensitivity_ceiling`
    /// is `Some` only for the committed scope; a violation leaves on-disk
    /// state untouched (checked before the journal append).
    pub fn write_item(
        &self,
        item: &MemoryItem,
        sensitivity_ceiling: Option<Sensitivity>,
        compact_every: u64,
    ) -> Result<WriteOutcome> {
        if let Some(ceiling) = sensitivity_ceiling {
            if item.security.sensitivity > ceiling {
                return Err(Error::SensitivityPolicy {
                    actual: item.security.sensitivity.to_string(),
                    max: ceiling.to_string(),
                });
            }
        }

        self.journal
            .append(&JournalEntry::upsert(item.clone(), "memory-manager"))?;
        self.items.write(item)?;
        self.catalog.upsert(item.to_summary())?;

        let count = self.appends_since_compaction.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(WriteOutcome {
            should_compact: count >= compact_every,
        })
    }

    /// Item files are authoritative for content; the catalog is not consulted.
    pub fn read_item(&self, id: &str) -> Option<MemoryItem> {
        self.items.read(id)
    }

    /// Appends a delete tombstone, removes the item file (idempotent), and
    /// removes the catalog entry. Returns whether the file existed.
    pub fn delete_item(&self, id: &str) -> Result<bool> {
        self.journal
            .append(&JournalEntry::delete(id, Utc::now(), "memory-manager"))?;
        let existed = self.items.remove(id)?;
        self.catalog.remove(id)?;
        Ok(existed)
    }

    pub fn list_items(&self) -> Vec<MemoryItem> {
        self.items.list_all()
    }

    pub fn read_catalog(&self) -> Catalog {
        self.catalog.read()
    }

    /// Recompute every summary from on-disk item files and atomically
    /// replace the catalog; idempotent (calling twice yields an identical file).
    pub fn rebuild_catalog(&self) -> Result<Catalog> {
        let catalog: Catalog = self
            .items
            .list_all()
            .into_iter()
            .map(|item| (item.id.clone(), item.to_summary()))
            .collect();
        self.catalog.write(&catalog)?;
        Ok(catalog)
    }

    pub fn read_journal(&self, limit: Option<usize>) -> Vec<JournalEntry> {
        self.journal.read(limit)
    }

    pub fn read_journal_since(&self, since: chrono::DateTime<Utc>) -> Vec<JournalEntry> {
        self.journal.read_since(since)
    }

    pub fn replace_journal(&self, entries: &[JournalEntry]) -> Result<()> {
        self.journal.replace(entries)
    }

    pub fn read_snapshot_meta(&self) -> Option<SnapshotMeta> {
        self.snapshot.read_snapshot()
    }

    pub fn write_snapshot_meta(&self, meta: &SnapshotMeta) -> Result<()> {
        self.snapshot.write_snapshot(meta)
    }

    pub fn read_state_ok(&self) -> Option<StateOk> {
        self.snapshot.read_state_ok()
    }

    pub fn write_state_ok(&self, state: &StateOk) -> Result<()> {
        self.snapshot.write_state_ok(state)
    }

    /// The checksum recovery compares against: catalog.json + the index shards.
    fn derived_files_checksum(&self) -> String {
        let index_dir = self.index_dir();
        let files = [
            self.dir.join("catalog.json"),
            index_dir.join("inverted.json"),
            index_dir.join("lengths.json"),
            index_dir.join("meta.json"),
            index_dir.join("vectors.json"),
        ];
        let refs: Vec<&Path> = files.iter().map(|p| p.as_path()).collect();
        compute_checksum(&refs)
    }

    /// Startup recovery: full replay if no
    /// snapshot or a checksum mismatch, else an incremental tail replay.
    /// Applies `upsert`/`delete` journal ops to item files and the catalog,
    /// then writes a fresh snapshot + state-ok marker.
    ///
    /// Returns the ids live after replay, so the caller (the manager) can
    /// rebuild the BM25/vector indexes from the resulting item set.
    pub fn recover(&self) -> Result<Vec<String>> {
        if !self.journal.exists() {
            info!(scope_dir = %self.dir.display(), "no journal, skipping recovery");
            return Ok(self.items.list_ids());
        }

        let snapshot = self.snapshot.read_snapshot();
        let do_full_replay = match &snapshot {
            None => true,
            Some(meta) => match &meta.checksum {
                None => false,
                Some(expected) => &self.derived_files_checksum() != expected,
            },
        };

        let entries = if do_full_replay {
            warn!(scope_dir = %self.dir.display(), "performing full journal replay");
            self.journal.read(None)
        } else {
            let since = snapshot.as_ref().map(|m| m.last_ts).unwrap_or_default();
            self.journal.read_since(since)
        };

        let mut catalog = if do_full_replay {
            Catalog::new()
        } else {
            self.catalog.read()
        };

        let mut max_ts = snapshot.as_ref().map(|m| m.last_ts);
        for entry in &entries {
            match entry.op {
                JournalOp::Upsert => {
                    if let Some(item) = &entry.item {
                        if self.items.read(&item.id).is_none() {
                            self.items.write(item)?;
                        }
                        catalog.insert(item.id.clone(), item.to_summary());
                    }
                }
                JournalOp::Delete => {
                    if let Some(id) = &entry.id {
                        self.items.remove(id)?;
                        catalog.remove(id);
                    }
                }
            }
            max_ts = Some(max_ts.map_or(entry.ts, |m| m.max(entry.ts)));
        }

        self.catalog.write(&catalog)?;

        let last_ts = max_ts.unwrap_or_else(Utc::now);
        let checksum = self.derived_files_checksum();
        self.snapshot.write_snapshot(&SnapshotMeta {
            last_ts,
            checksum: Some(checksum.clone()),
        })?;
        self.snapshot.write_state_ok(&StateOk {
            ts: Utc::now(),
            checksum: Some(checksum),
        })?;

        Ok(catalog.keys().cloned().collect())
    }

    /// Materialize the current live state into a fresh journal (one upsert
    /// per live id, tombstones dropped), then refresh snapshot/state markers
    /// and reset the append counter.
    pub fn compact(&self) -> Result<()> {
        info!(scope_dir = %self.dir.display(), "compacting");
        let items = self.items.list_all();
        let entries: Vec<JournalEntry> = items
            .iter()
            .map(|item| JournalEntry::upsert(item.clone(), "compaction"))
            .collect();
        self.journal.replace(&entries)?;

        let last_ts = entries.iter().map(|e| e.ts).max().unwrap_or_else(Utc::now);
        let checksum = self.derived_files_checksum();
        self.snapshot.write_snapshot(&SnapshotMeta {
            last_ts,
            checksum: Some(checksum.clone()),
        })?;
        self.snapshot.write_state_ok(&StateOk {
            ts: Utc::now(),
            checksum: Some(checksum),
        })?;
        self.appends_since_compaction.store(0, Ordering::SeqCst);
        Ok(())
    }

    pub fn appends_since_compaction(&self) -> u64 {
        self.appends_since_compaction.load(Ordering::SeqCst)
    }
}
