//! Local-first, per-developer memory engine.
//!
//! Three independent append-only stores (global, local, committed — see
//! [`model::Scope`]) feed a BM25 + vector hybrid index per scope, queried
//! through [`manager::MemoryManager`] and assembled into budgeted
//! [`contextpack::ContextPack`]s.

pub mod cache;
pub mod config;
pub mod contextpack;
pub mod error;
pub mod index;
pub mod interfaces;
pub mod logging;
pub mod maintenance;
pub mod manager;
pub mod model;
pub mod paths;
pub mod store;

pub use error::{Error, Result};
pub use maintenance::{MaintenanceIntervals, MaintenanceScheduler};
pub use manager::{MemoryManager, UpsertInput};
pub use manager::query::{ConfidenceRange, MemoryQuery, QueryFilters, QueryResult, TimeRange};
pub use manager::sync::{SyncMergeResult, SyncMergeSkip, SyncStatus};
pub use model::{
    Context, Facets, Link, LinkRel, LineRange, MemoryItem, MemoryItemSummary, Quality, Scope,
    ScopeSelector, Security, Sensitivity, ItemType,
};
pub use contextpack::{ContextPack, ContextPackRequest};
