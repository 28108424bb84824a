//! Shared atomic-write discipline: stage under `tmp/`, then rename into place.

use crate::error::Result;
use std::path::Path;

/// Serialize `value` and atomically replace `path` with it, staging the
/// write under `tmp_dir` first. Every durable file the store touches
/// (catalog, journal, snapshot, state, item, index shards) goes through this.
pub fn write_json_atomic<T: serde::Serialize>(
    tmp_dir: &Path,
    path: &Path,
    value: &T,
) -> Result<()> {
    std::fs::create_dir_all(tmp_dir)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "unnamed".to_string());
    let tmp_path = tmp_dir.join(format!("{file_name}.{}.tmp", std::process::id()));

    let bytes = serde_json::to_vec_pretty(value)?;
    std::fs::write(&tmp_path, bytes)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Atomically replace `path` with raw `bytes` (used for the journal, whose
/// lines are written verbatim rather than through `serde_json`).
pub fn write_bytes_atomic(tmp_dir: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::create_dir_all(tmp_dir)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "unnamed".to_string());
    let tmp_path = tmp_dir.join(format!("{file_name}.{}.tmp", std::process::id()));

    std::fs::write(&tmp_path, bytes)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Best-effort parse of a JSON file; `None` on missing or corrupt input,
/// matching the "read paths prefer degraded answers over failure" policy.
pub fn read_json_lenient<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = std::fs::read(path).ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "corrupt json file, treating as absent");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        n: u32,
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        let tmp = dir.path().join("tmp");
        write_json_atomic(&tmp, &path, &Sample { n: 7 }).unwrap();
        let read: Sample = read_json_lenient(&path).unwrap();
        assert_eq!(read, Sample { n: 7 });
    }

    #[test]
    fn corrupt_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        std::fs::write(&path, b"{not json").unwrap();
        let read: Option<Sample> = read_json_lenient(&path);
        assert!(read.is_none());
    }
}
