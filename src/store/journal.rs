//! `journal.ndjson`: the append-only, strictly ordered log of ops that is the
//! durability boundary for the store.

use crate::error::Result;
use crate::model::JournalEntry;
use crate::store::atomic::write_bytes_atomic;
use crate::store::lock;
use chrono::{DateTime, Utc};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Handle onto a scope's `journal.ndjson`.
pub struct Journal {
    path: PathBuf,
    locks_dir: PathBuf,
    tmp_dir: PathBuf,
}

impl Journal {
    pub fn new(scope_dir: &Path) -> Self {
        Self {
            path: scope_dir.join("journal.ndjson"),
            locks_dir: scope_dir.join("locks"),
            tmp_dir: scope_dir.join("tmp"),
        }
    }

    /// Append one entry, holding the per-scope `journal` lock for the
    /// duration of the write so concurrent writers never interleave lines
    /// (see DESIGN.md for why the lock is scoped to the append only).
    pub fn append(&self, entry: &JournalEntry) -> Result<()> {
        let _guard = lock::acquire(&self.locks_dir, "journal")?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Read up to `limit` entries from the start of the journal (or all, if
    /// `limit` is `None`). Malformed lines are skipped, not fatal.
    pub fn read(&self, limit: Option<usize>) -> Vec<JournalEntry> {
        self.read_filtered(|_| true, limit)
    }

    /// Entries with `ts` strictly greater than `since` (exclusive).
    pub fn read_since(&self, since: DateTime<Utc>) -> Vec<JournalEntry> {
        self.read_filtered(|e| e.ts > since, None)
    }

    fn read_filtered(
        &self,
        pred: impl Fn(&JournalEntry) -> bool,
        limit: Option<usize>,
    ) -> Vec<JournalEntry> {
        let Ok(file) = std::fs::File::open(&self.path) else {
            return Vec::new();
        };
        let reader = BufReader::new(file);
        let mut out = Vec::new();
        for line in reader.lines() {
            let Ok(line) = line else { continue };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalEntry>(&line) {
                Ok(entry) if pred(&entry) => {
                    out.push(entry);
                    if let Some(l) = limit {
                        if out.len() >= l {
                            break;
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed journal line");
                }
            }
        }
        out
    }

    /// Atomically replace the whole journal with `entries`, used by
    /// compaction. Order is preserved.
    pub fn replace(&self, entries: &[JournalEntry]) -> Result<()> {
        let _guard = lock::acquire(&self.locks_dir, "journal")?;
        let mut buf = Vec::new();
        for entry in entries {
            serde_json::to_writer(&mut buf, entry)?;
            buf.push(b'\n');
        }
        write_bytes_atomic(&self.tmp_dir, &self.path, &buf)
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ItemType, MemoryItem, Quality, Scope, Security};

    fn sample_item(id: &str) -> MemoryItem {
        let now = Utc::now();
        MemoryItem {
            id: id.to_string(),
            item_type: ItemType::Note,
            scope: Scope::Global,
            title: Some("t".into()),
            text: Some("hello".into()),
            code: None,
            language: None,
            facets: Default::default(),
            context: None,
            quality: Quality::default(),
            security: Security::default(),
            vectors: None,
            links: vec![],
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    #[test]
    fn append_then_read_round_trips_order() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::new(dir.path());
        let a = JournalEntry::upsert(sample_item("a"), "test");
        let b = JournalEntry::upsert(sample_item("b"), "test");
        journal.append(&a).unwrap();
        journal.append(&b).unwrap();

        let entries = journal.read(None);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].item_id(), Some("a"));
        assert_eq!(entries[1].item_id(), Some("b"));
    }

    #[test]
    fn replace_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::new(dir.path());
        let entries = vec![
            JournalEntry::upsert(sample_item("a"), "test"),
            JournalEntry::upsert(sample_item("b"), "test"),
        ];
        journal.replace(&entries).unwrap();
        let read_back = journal.read(None);
        assert_eq!(read_back.len(), 2);
        assert_eq!(read_back[0].item_id(), Some("a"));
        assert_eq!(read_back[1].item_id(), Some("b"));
    }

    #[test]
    fn read_since_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::new(dir.path());
        let mut item_a = sample_item("a");
        item_a.updated_at = Utc::now();
        let entry_a = JournalEntry::upsert(item_a.clone(), "test");
        journal.append(&entry_a).unwrap();

        let since = journal.read(None)[0].ts;
        let mut item_b = sample_item("b");
        item_b.updated_at = since + chrono::Duration::seconds(1);
        journal.append(&JournalEntry::upsert(item_b, "test")).unwrap();

        let tail = journal.read_since(since);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].item_id(), Some("b"));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::new(dir.path());
        journal.append(&JournalEntry::upsert(sample_item("a"), "test")).unwrap();
        {
            let mut f = OpenOptions::new().append(true).open(&journal.path).unwrap();
            writeln!(f, "{{not json}}").unwrap();
        }
        let entries = journal.read(None);
        assert_eq!(entries.len(), 1);
    }
}
