//! `snapshot.json` and `state.ok`: recovery markers over the catalog + index.

use crate::error::Result;
use crate::model::{SnapshotMeta, StateOk};
use crate::store::atomic::{read_json_lenient, write_json_atomic};
use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};

pub struct SnapshotStore {
    snapshot_path: PathBuf,
    state_path: PathBuf,
    tmp_dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(scope_dir: &Path) -> Self {
        Self {
            snapshot_path: scope_dir.join("snapshot.json"),
            state_path: scope_dir.join("state.ok"),
            tmp_dir: scope_dir.join("tmp"),
        }
    }

    pub fn read_snapshot(&self) -> Option<SnapshotMeta> {
        read_json_lenient(&self.snapshot_path)
    }

    pub fn write_snapshot(&self, meta: &SnapshotMeta) -> Result<()> {
        write_json_atomic(&self.tmp_dir, &self.snapshot_path, meta)
    }

    pub fn read_state_ok(&self) -> Option<StateOk> {
        read_json_lenient(&self.state_path)
    }

    pub fn write_state_ok(&self, state: &StateOk) -> Result<()> {
        write_json_atomic(&self.tmp_dir, &self.state_path, state)
    }
}

/// Checksum over the catalog + index files, used to decide whether a
/// snapshot's materialized state still matches what's on disk.
pub fn compute_checksum(files: &[&Path]) -> String {
    let mut hasher = Sha1::new();
    for path in files {
        if let Ok(bytes) = std::fs::read(path) {
            hasher.update(&bytes);
        }
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn snapshot_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let meta = SnapshotMeta {
            last_ts: Utc::now(),
            checksum: Some("abc".into()),
        };
        store.write_snapshot(&meta).unwrap();
        let read_back = store.read_snapshot().unwrap();
        assert_eq!(read_back.checksum, Some("abc".into()));
    }

    #[test]
    fn checksum_changes_when_file_contents_change() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.json");
        std::fs::write(&a, b"{}").unwrap();
        let c1 = compute_checksum(&[&a]);
        std::fs::write(&a, b"{\"x\":1}").unwrap();
        let c2 = compute_checksum(&[&a]);
        assert_ne!(c1, c2);
    }

    #[test]
    fn checksum_tolerates_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        let checksum = compute_checksum(&[&missing]);
        assert_eq!(checksum.len(), 40);
    }
}
