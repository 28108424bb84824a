//! Debounced flush discipline for per-scope index updates: the manager
//! records pending upserts/deletes here; a timer or operation-count
//! threshold (owned by [`crate::maintenance::MaintenanceScheduler`]) drains
//! them into the actual BM25/vector indexes.

use crate::index::bm25::{FieldWeights, InvertedIndex};
use crate::index::vector::VectorIndex;
use crate::model::MemoryItem;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

#[derive(Default)]
struct Pending {
    upserts: HashMap<String, MemoryItem>,
    deletes: HashSet<String>,
    ops_since_flush: u64,
}

/// Coalescing buffer of index mutations awaiting a flush.
pub struct PendingIndexOps {
    state: Mutex<Pending>,
}

impl Default for PendingIndexOps {
    fn default() -> Self {
        Self {
            state: Mutex::new(Pending::default()),
        }
    }
}

impl PendingIndexOps {
    pub fn new() -> Self {
        Self::default()
    }

    /// An upsert supersedes any pending delete for the same id, and coalesces
    /// with any pending upsert for it.
    pub fn record_upsert(&self, item: MemoryItem) {
        let mut state = self.state.lock();
        state.deletes.remove(&item.id);
        state.upserts.insert(item.id.clone(), item);
        state.ops_since_flush += 1;
    }

    pub fn record_delete(&self, id: &str) {
        let mut state = self.state.lock();
        state.upserts.remove(id);
        state.deletes.insert(id.to_string());
        state.ops_since_flush += 1;
    }

    pub fn should_flush(&self, max_ops: u64) -> bool {
        self.state.lock().ops_since_flush >= max_ops
    }

    pub fn is_empty(&self) -> bool {
        let state = self.state.lock();
        state.upserts.is_empty() && state.deletes.is_empty()
    }

    fn take(&self) -> (Vec<MemoryItem>, Vec<String>) {
        let mut state = self.state.lock();
        state.ops_since_flush = 0;
        let upserts: Vec<MemoryItem> = state.upserts.drain().map(|(_, v)| v).collect();
        let deletes: Vec<String> = state.deletes.drain().collect();
        (upserts, deletes)
    }

    /// Drain pending ops once and apply the same batch to both the BM25 and
    /// vector indexes. `take()` clears the buffer, so BM25 and vector
    /// updates must be fed from one drain rather than two independent calls
    /// — otherwise the second call sees an already-empty buffer and its
    /// updates are silently lost.
    pub fn flush(
        &self,
        bm25: &InvertedIndex,
        weights: FieldWeights,
        vectors: &VectorIndex,
    ) -> crate::error::Result<()> {
        let (upserts, deletes) = self.take();
        for item in &upserts {
            bm25.update_item(item, weights)?;
            if let Some(vector) = &item.vectors {
                vectors.set(&item.id, vector.clone())?;
            }
        }
        for id in &deletes {
            bm25.remove_item(id)?;
            vectors.remove(id)?;
        }
        Ok(())
    }

    /// Drain pending ops and apply them to the BM25 index only. Exposed for
    /// callers that only own a BM25 index; `flush` is the correct choice
    /// whenever both indexes are available, since it drains once for both.
    pub fn flush_bm25(&self, index: &InvertedIndex, weights: FieldWeights) -> crate::error::Result<()> {
        let (upserts, deletes) = self.take();
        for item in &upserts {
            index.update_item(item, weights)?;
        }
        for id in &deletes {
            index.remove_item(id)?;
        }
        Ok(())
    }

    /// Drain pending ops and apply them to the vector index only (only items
    /// carrying `vectors` contribute an upsert). See `flush_bm25`'s note.
    pub fn flush_vectors(&self, index: &VectorIndex) -> crate::error::Result<()> {
        let (upserts, deletes) = self.take();
        for item in &upserts {
            if let Some(vector) = &item.vectors {
                index.set(&item.id, vector.clone())?;
            }
        }
        for id in &deletes {
            index.remove(id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Facets, ItemType, Quality, Scope, Security};
    use chrono::Utc;

    fn item(id: &str) -> MemoryItem {
        let now = Utc::now();
        MemoryItem {
            id: id.to_string(),
            item_type: ItemType::Note,
            scope: Scope::Global,
            title: Some("t".into()),
            text: Some("hello".into()),
            code: None,
            language: None,
            facets: Facets::default(),
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
    fn upsert_after_delete_supersedes_it() {
        let pending = PendingIndexOps::new();
        pending.record_delete("a");
        pending.record_upsert(item("a"));
        let (upserts, deletes) = pending.take();
        assert_eq!(upserts.len(), 1);
        assert!(deletes.is_empty());
    }

    #[test]
    fn consecutive_upserts_to_same_id_coalesce() {
        let pending = PendingIndexOps::new();
        pending.record_upsert(item("a"));
        pending.record_upsert(item("a"));
        let (upserts, _) = pending.take();
        assert_eq!(upserts.len(), 1);
    }

    #[test]
    fn should_flush_honors_op_threshold() {
        let pending = PendingIndexOps::new();
        assert!(!pending.should_flush(2));
        pending.record_upsert(item("a"));
        pending.record_upsert(item("b"));
        assert!(pending.should_flush(2));
    }

    #[test]
    fn flush_bm25_applies_upserts_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let index = InvertedIndex::new(dir.path());
        let pending = PendingIndexOps::new();
        pending.record_upsert(item("a"));
        pending.flush_bm25(&index, FieldWeights::default()).unwrap();
        assert_eq!(index.doc_count(), 1);

        pending.record_delete("a");
        pending.flush_bm25(&index, FieldWeights::default()).unwrap();
        assert_eq!(index.doc_count(), 0);
    }

    fn item_with_vector(id: &str, vector: Vec<f32>) -> MemoryItem {
        let mut it = item(id);
        it.vectors = Some(vector);
        it
    }

    #[test]
    fn flush_updates_bm25_and_vector_index_from_one_drain() {
        let dir = tempfile::tempdir().unwrap();
        let bm25 = InvertedIndex::new(dir.path());
        let vectors = VectorIndex::new(dir.path());
        let pending = PendingIndexOps::new();

        pending.record_upsert(item_with_vector("a", vec![1.0, 0.0]));
        pending.flush(&bm25, FieldWeights::default(), &vectors).unwrap();

        assert_eq!(bm25.doc_count(), 1);
        assert_eq!(vectors.len(), 1);

        pending.record_delete("a");
        pending.flush(&bm25, FieldWeights::default(), &vectors).unwrap();
        assert_eq!(bm25.doc_count(), 0);
        assert_eq!(vectors.len(), 0);
    }
}
