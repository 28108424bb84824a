//! Query result cache: an LRU keyed on a normalized query subset, wholesale
//! invalidated on any mutation. Hand-rolled rather than via an external
//! `lru` crate, following the ring-buffer-over-state style used throughout
//! this crate's in-memory stores.

use parking_lot::Mutex;
use std::collections::VecDeque;

/// The normalized subset of a `MemoryQuery` the cache keys on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryCacheKey {
    pub q: Option<String>,
    pub scope: String,
    pub item_type: Vec<String>,
    pub tags: Vec<String>,
    pub files: Vec<String>,
    pub symbols: Vec<String>,
    pub language: Vec<String>,
    pub k: usize,
}

struct Entry<V> {
    key: QueryCacheKey,
    value: V,
}

/// A small LRU keyed on [`QueryCacheKey`]. Capacity-bounded; insertion evicts
/// the least-recently-used entry once full.
pub struct QueryCache<V: Clone> {
    capacity: usize,
    entries: Mutex<VecDeque<Entry<V>>>,
}

impl<V: Clone> QueryCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn get(&self, key: &QueryCacheKey) -> Option<V> {
        let mut entries = self.entries.lock();
        let pos = entries.iter().position(|e| &e.key == key)?;
        let entry = entries.remove(pos)?;
        let value = entry.value.clone();
        entries.push_front(entry);
        Some(value)
    }

    pub fn put(&self, key: QueryCacheKey, value: V) {
        let mut entries = self.entries.lock();
        if let Some(pos) = entries.iter().position(|e| e.key == key) {
            entries.remove(pos);
        }
        entries.push_front(Entry { key, value });
        while entries.len() > self.capacity {
            entries.pop_back();
        }
    }

    /// Wholesale invalidation, triggered by any mutation in any scope.
    pub fn invalidate_all(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(q: &str) -> QueryCacheKey {
        QueryCacheKey {
            q: Some(q.to_string()),
            scope: "project".into(),
            item_type: vec![],
            tags: vec![],
            files: vec![],
            symbols: vec![],
            language: vec![],
            k: 50,
        }
    }

    #[test]
    fn put_then_get_hits() {
        let cache: QueryCache<Vec<String>> = QueryCache::new(4);
        cache.put(key("alpha"), vec!["a".into()]);
        assert_eq!(cache.get(&key("alpha")), Some(vec!["a".into()]));
    }

    #[test]
    fn invalidate_all_clears_everything() {
        let cache: QueryCache<Vec<String>> = QueryCache::new(4);
        cache.put(key("alpha"), vec!["a".into()]);
        cache.invalidate_all();
        assert!(cache.get(&key("alpha")).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let cache: QueryCache<Vec<String>> = QueryCache::new(2);
        cache.put(key("a"), vec!["a".into()]);
        cache.put(key("b"), vec!["b".into()]);
        // touch "a" so "b" becomes the LRU entry
        let _ = cache.get(&key("a"));
        cache.put(key("c"), vec!["c".into()]);
        assert!(cache.get(&key("b")).is_none());
        assert!(cache.get(&key("a")).is_some());
        assert!(cache.get(&key("c")).is_some());
    }
}
