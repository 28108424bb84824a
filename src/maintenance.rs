//! Background timers: debounced index flush, periodic compaction, periodic
//! snapshot. Plain `tokio::spawn` loops holding `JoinHandle`s, rather than a
//! cron-style scheduler — overkill for three fixed-interval timers.

use crate::manager::MemoryManager;
use crate::model::Scope;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct MaintenanceIntervals {
    pub index_flush_max_ms: u64,
    pub index_flush_max_ops: u64,
    pub compact_interval_ms: u64,
}

impl Default for MaintenanceIntervals {
    fn default() -> Self {
        Self {
            index_flush_max_ms: 500,
            index_flush_max_ops: 200,
            compact_interval_ms: 24 * 60 * 60 * 1000,
        }
    }
}

/// Owns the background tasks that keep a [`MemoryManager`]'s indexes and
/// snapshots current without blocking the foreground write path.
pub struct MaintenanceScheduler {
    tasks: Vec<JoinHandle<()>>,
}

impl MaintenanceScheduler {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    /// Timer-triggered index flush: drains pending BM25/vector updates on
    /// every scope at `index_flush_max_ms`.
    pub fn start_index_flush(&mut self, manager: Arc<MemoryManager>, intervals: MaintenanceIntervals) {
        let handle = tokio::spawn(async move {
            let period = Duration::from_millis(intervals.index_flush_max_ms);
            loop {
                tokio::time::sleep(period).await;
                if let Err(e) = manager.flush_due_indexes(intervals.index_flush_max_ops) {
                    error!(error = %e, "index flush failed");
                }
            }
        });
        self.tasks.push(handle);
    }

    /// Periodic compaction, independent of the append-count trigger already
    /// handled inline by `Store::write_item`.
    pub fn start_compaction_timer(
        &mut self,
        manager: Arc<MemoryManager>,
        scopes: Vec<Scope>,
        interval_ms: u64,
    ) {
        let handle = tokio::spawn(async move {
            let period = Duration::from_millis(interval_ms);
            loop {
                tokio::time::sleep(period).await;
                for scope in &scopes {
                    if let Err(e) = manager.compact(*scope) {
                        warn!(error = %e, scope = %scope, "periodic compaction failed");
                    }
                }
            }
        });
        self.tasks.push(handle);
    }

    /// Periodic snapshot refresh, independent of compaction.
    pub fn start_snapshot_timer(
        &mut self,
        manager: Arc<MemoryManager>,
        scopes: Vec<Scope>,
        interval_ms: u64,
    ) {
        let handle = tokio::spawn(async move {
            let period = Duration::from_millis(interval_ms);
            loop {
                tokio::time::sleep(period).await;
                for scope in &scopes {
                    if let Err(e) = manager.snapshot(*scope) {
                        warn!(error = %e, scope = %scope, "periodic snapshot failed");
                    }
                }
            }
        });
        self.tasks.push(handle);
    }

    /// Drain pending work and stop every background task. Callers should
    /// flush indexes and write a final snapshot before calling this, since
    /// abort does not let an in-flight iteration finish.
    pub async fn shutdown(self, manager: &MemoryManager, scopes: &[Scope]) {
        info!(tasks = self.tasks.len(), "shutting down maintenance scheduler");
        for scope in scopes {
            if let Err(e) = manager.verify(*scope) {
                warn!(error = %e, scope = %scope, "final index flush during shutdown failed");
            }
            if let Err(e) = manager.snapshot(*scope) {
                warn!(error = %e, scope = %scope, "final snapshot during shutdown failed");
            }
        }
        for task in self.tasks {
            task.abort();
        }
    }
}

impl Default for MaintenanceScheduler {
    fn default() -> Self {
        Self::new()
    }
}
