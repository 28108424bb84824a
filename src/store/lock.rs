//! Advisory file locks for the `catalog` and `journal` write paths.
//!
//! A lock is a small JSON file under `locks/<name>.lock` naming the holder's
//! process id and acquisition time. A lock older than [`STALE_AFTER`] is
//! considered abandoned and is removed rather than honored.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Wall-clock age after which a lock file is treated as abandoned.
pub const STALE_AFTER: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize, Deserialize)]
struct LockContents {
    pid: u32,
    /// Unix millis of acquisition.
    ts: i64,
}

/// A held advisory lock; releases (deletes the lock file) on drop.
pub struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Attempt to acquire the named advisory lock inside `locks_dir`.
///
/// Returns `Err(Error::Locked)` if a live (non-stale) lock is already held by
/// someone else. A stale lock is removed and re-acquired transparently.
pub fn acquire(locks_dir: &Path, name: &str) -> Result<LockGuard> {
    std::fs::create_dir_all(locks_dir)?;
    let path = locks_dir.join(format!("{name}.lock"));

    if let Ok(existing) = std::fs::read(&path) {
        if let Ok(contents) = serde_json::from_slice::<LockContents>(&existing) {
            let age_ms = now_millis() - contents.ts;
            if age_ms >= 0 && (age_ms as u64) < STALE_AFTER.as_millis() as u64 {
                return Err(Error::Locked(format!(
                    "{name} held by pid {} ({}ms ago)",
                    contents.pid, age_ms
                )));
            }
            warn!(lock = %name, pid = contents.pid, age_ms, "removing stale lock");
        }
    }

    let contents = LockContents {
        pid: std::process::id(),
        ts: now_millis(),
    };
    let tmp = locks_dir.join(format!("{name}.lock.tmp"));
    std::fs::write(&tmp, serde_json::to_vec(&contents)?)?;
    std::fs::rename(&tmp, &path)?;

    Ok(LockGuard { path })
}
