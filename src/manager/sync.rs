//! `syncStatus` / `syncMerge`: comparing and merging the local and committed
//! catalogs.

use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStatus {
    pub only_local: Vec<String>,
    pub only_committed: Vec<String>,
    pub local_newer: Vec<String>,
    pub committed_newer: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncMergeResult {
    pub merged: Vec<String>,
    pub skipped: Vec<SyncMergeSkip>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncMergeSkip {
    pub id: String,
    pub reason: String,
}

/// Compare local and committed catalogs by id and by `updatedAt` (ISO,
/// lexicographically monotonic, so plain string comparison is correct).
pub fn compute_status(
    local: &crate::model::Catalog,
    committed: &crate::model::Catalog,
) -> SyncStatus {
    let mut status = SyncStatus::default();
    for (id, local_entry) in local {
        match committed.get(id) {
            None => status.only_local.push(id.clone()),
            Some(committed_entry) => {
                let local_ts = local_entry.updated_at.to_rfc3339();
                let committed_ts = committed_entry.updated_at.to_rfc3339();
                if local_ts > committed_ts {
                    status.local_newer.push(id.clone());
                } else if committed_ts > local_ts {
                    status.committed_newer.push(id.clone());
                }
            }
        }
    }
    for id in committed.keys() {
        if !local.contains_key(id) {
            status.only_committed.push(id.clone());
        }
    }
    status.only_local.sort();
    status.only_committed.sort();
    status.local_newer.sort();
    status.committed_newer.sort();
    status
}
