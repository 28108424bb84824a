//! The BM25 inverted index: persisted as `inverted.json`, `lengths.json`,
//! `meta.json` under a scope's `index/` directory, with in-memory state
//! guarded by a `parking_lot::RwLock`.

use crate::error::Result;
use crate::interfaces::tokenize;
use crate::model::MemoryItem;
use crate::store::atomic::{read_json_lenient, write_json_atomic};
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Per-field multipliers applied to token weights before insertion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FieldWeights {
    pub title: f64,
    pub text: f64,
    pub code: f64,
    pub tag: f64,
}

impl Default for FieldWeights {
    fn default() -> Self {
        Self {
            title: 5.0,
            text: 2.0,
            code: 1.5,
            tag: 3.0,
        }
    }
}

/// BM25 tuning parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Meta {
    doc_count: usize,
    updated_at: chrono::DateTime<Utc>,
}

type Postings = HashMap<String, HashMap<String, f64>>;
type Lengths = HashMap<String, f64>;

struct State {
    postings: Postings,
    lengths: Lengths,
    meta: Meta,
}

/// A scope's BM25 inverted index, backed by `index/{inverted,lengths,meta}.json`.
pub struct InvertedIndex {
    inverted_path: PathBuf,
    lengths_path: PathBuf,
    meta_path: PathBuf,
    tmp_dir: PathBuf,
    state: RwLock<State>,
}

impl InvertedIndex {
    pub fn new(scope_dir: &Path) -> Self {
        let index_dir = scope_dir.join("index");
        let inverted_path = index_dir.join("inverted.json");
        let lengths_path = index_dir.join("lengths.json");
        let meta_path = index_dir.join("meta.json");

        let postings = read_json_lenient(&inverted_path).unwrap_or_default();
        let lengths = read_json_lenient(&lengths_path).unwrap_or_default();
        let meta = read_json_lenient(&meta_path).unwrap_or_default();

        Self {
            inverted_path,
            lengths_path,
            meta_path,
            tmp_dir: scope_dir.join("tmp"),
            state: RwLock::new(State {
                postings,
                lengths,
                meta,
            }),
        }
    }

    fn weighted_tokens(item: &MemoryItem, weights: FieldWeights) -> HashMap<String, f64> {
        let mut weighted: HashMap<String, f64> = HashMap::new();
        let mut add = |field: Option<&str>, weight: f64| {
            let Some(field) = field else { return };
            for token in tokenize(field) {
                *weighted.entry(token).or_insert(0.0) += weight;
            }
        };
        add(item.title.as_deref(), weights.title);
        add(item.text.as_deref(), weights.text);
        add(item.code.as_deref(), weights.code);
        for tag in &item.facets.tags {
            add(Some(tag.as_str()), weights.tag);
        }
        weighted
    }

    /// Remove all postings for `item.id`, re-tokenize, reinsert, recompute
    /// `lengths[id]` and `docCount`.
    pub fn update_item(&self, item: &MemoryItem, weights: FieldWeights) -> Result<()> {
        let mut state = self.state.write();
        Self::remove_locked(&mut state, &item.id);

        let weighted = Self::weighted_tokens(item, weights);
        let length: f64 = weighted.values().sum::<f64>() + 1.0;
        for (token, weight) in weighted {
            state
                .postings
                .entry(token)
                .or_default()
                .insert(item.id.clone(), weight);
        }
        state.lengths.insert(item.id.clone(), length);
        state.meta.doc_count = state.lengths.len();
        state.meta.updated_at = Utc::now();
        self.persist(&state)
    }

    fn remove_locked(state: &mut State, id: &str) {
        for postings in state.postings.values_mut() {
            postings.remove(id);
        }
        state.postings.retain(|_, postings| !postings.is_empty());
        state.lengths.remove(id);
    }

    pub fn remove_item(&self, id: &str) -> Result<()> {
        let mut state = self.state.write();
        Self::remove_locked(&mut state, id);
        state.meta.doc_count = state.lengths.len();
        state.meta.updated_at = Utc::now();
        self.persist(&state)
    }

    pub fn rebuild_from_items(&self, items: &[MemoryItem], weights: FieldWeights) -> Result<()> {
        let mut state = self.state.write();
        state.postings.clear();
        state.lengths.clear();
        for item in items {
            let weighted = Self::weighted_tokens(item, weights);
            let length: f64 = weighted.values().sum::<f64>() + 1.0;
            for (token, weight) in weighted {
                state
                    .postings
                    .entry(token)
                    .or_default()
                    .insert(item.id.clone(), weight);
            }
            state.lengths.insert(item.id.clone(), length);
        }
        state.meta.doc_count = state.lengths.len();
        state.meta.updated_at = Utc::now();
        self.persist(&state)
    }

    fn persist(&self, state: &State) -> Result<()> {
        write_json_atomic(&self.tmp_dir, &self.inverted_path, &state.postings)?;
        write_json_atomic(&self.tmp_dir, &self.lengths_path, &state.lengths)?;
        write_json_atomic(&self.tmp_dir, &self.meta_path, &state.meta)?;
        Ok(())
    }

    /// BM25-score `term` against every id with a matching token, optionally
    /// boosted, and return ids sorted by descending score.
    pub fn search(
        &self,
        term: &str,
        params: Bm25Params,
        boost: impl Fn(&str) -> f64,
    ) -> Vec<(String, f64)> {
        let state = self.state.read();
        let n = state.lengths.len().max(1) as f64;
        let avgdl = if state.lengths.is_empty() {
            1.0
        } else {
            state.lengths.values().sum::<f64>() / state.lengths.len() as f64
        };

        let mut scores: HashMap<String, f64> = HashMap::new();
        for token in tokenize(term) {
            let Some(postings) = state.postings.get(&token) else {
                continue;
            };
            let df = postings.len() as f64;
            if df == 0.0 {
                continue;
            }
            let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
            for (id, &tf) in postings {
                let dl = state.lengths.get(id).copied().unwrap_or(1.0);
                let tf_component =
                    tf * (params.k1 + 1.0) / (tf + params.k1 * (1.0 - params.b + params.b * (dl / avgdl)));
                *scores.entry(id.clone()).or_insert(0.0) += idf * tf_component;
            }
        }

        let mut results: Vec<(String, f64)> = scores
            .into_iter()
            .map(|(id, score)| {
                let boosted = score + boost(&id);
                (id, boosted)
            })
            .collect();
        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        results
    }

    pub fn doc_count(&self) -> usize {
        self.state.read().meta.doc_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Facets, ItemType, Quality, Scope, Security};

    fn item(id: &str, title: &str, text: &str) -> MemoryItem {
        let now = Utc::now();
        MemoryItem {
            id: id.to_string(),
            item_type: ItemType::Note,
            scope: Scope::Global,
            title: Some(title.to_string()),
            text: Some(text.to_string()),
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
    fn update_then_search_finds_matching_term() {
        let dir = tempfile::tempdir().unwrap();
        let index = InvertedIndex::new(dir.path());
        index
            .update_item(&item("a", "retry logic", "implements exponential backoff"), FieldWeights::default())
            .unwrap();
        index
            .update_item(&item("b", "unrelated", "nothing about networking"), FieldWeights::default())
            .unwrap();

        let results = index.search("backoff", Bm25Params::default(), |_| 0.0);
        assert_eq!(results[0].0, "a");
    }

    #[test]
    fn title_weight_outranks_text_weight_for_same_term() {
        let dir = tempfile::tempdir().unwrap();
        let index = InvertedIndex::new(dir.path());
        index
            .update_item(&item("a", "cache", "plain text"), FieldWeights::default())
            .unwrap();
        index
            .update_item(&item("b", "plain", "cache appears in text only"), FieldWeights::default())
            .unwrap();

        let results = index.search("cache", Bm25Params::default(), |_| 0.0);
        assert_eq!(results[0].0, "a");
    }

    #[test]
    fn remove_item_drops_it_from_results() {
        let dir = tempfile::tempdir().unwrap();
        let index = InvertedIndex::new(dir.path());
        index
            .update_item(&item("a", "cache", "text"), FieldWeights::default())
            .unwrap();
        index.remove_item("a").unwrap();
        assert_eq!(index.doc_count(), 0);
        assert!(index.search("cache", Bm25Params::default(), |_| 0.0).is_empty());
    }

    #[test]
    fn boost_can_change_ranking_order() {
        let dir = tempfile::tempdir().unwrap();
        let index = InvertedIndex::new(dir.path());
        index
            .update_item(&item("a", "cache layer", "cache"), FieldWeights::default())
            .unwrap();
        index
            .update_item(&item("b", "other", "cache mentioned once"), FieldWeights::default())
            .unwrap();

        let boosted = index.search("cache", Bm25Params::default(), |id| {
            if id == "b" {
                100.0
            } else {
                0.0
            }
        });
        assert_eq!(boosted[0].0, "b");
    }

    #[test]
    fn rebuild_from_items_replaces_prior_state() {
        let dir = tempfile::tempdir().unwrap();
        let index = InvertedIndex::new(dir.path());
        index
            .update_item(&item("a", "stale", "stale entry"), FieldWeights::default())
            .unwrap();
        index
            .rebuild_from_items(&[item("b", "fresh", "fresh entry")], FieldWeights::default())
            .unwrap();
        assert_eq!(index.doc_count(), 1);
        assert!(index.search("stale", Bm25Params::default(), |_| 0.0).is_empty());
    }
}
