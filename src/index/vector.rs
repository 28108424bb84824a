//! The cosine vector index: `id -> float[d]` persisted as
//! a single JSON object under `index/vectors.json`, dimension-uniform per
//! scope.

use crate::error::{Error, Result};
use crate::store::atomic::{read_json_lenient, write_json_atomic};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};

struct State {
    vectors: HashMap<String, Vec<f32>>,
    dim: Option<usize>,
}

/// A scope's vector index, backed by `index/vectors.json`.
pub struct VectorIndex {
    path: PathBuf,
    tmp_dir: PathBuf,
    state: RwLock<State>,
}

impl VectorIndex {
    pub fn new(scope_dir: &Path) -> Self {
        let path = scope_dir.join("index").join("vectors.json");
        let vectors: HashMap<String, Vec<f32>> = read_json_lenient(&path).unwrap_or_default();
        let dim = vectors.values().next().map(|v| v.len());
        Self {
            path,
            tmp_dir: scope_dir.join("tmp"),
            state: RwLock::new(State { vectors, dim }),
        }
    }

    fn check_dim(state: &State, len: usize) -> Result<()> {
        if let Some(expected) = state.dim {
            if expected != len {
                return Err(Error::DimensionMismatch {
                    expected,
                    actual: len,
                });
            }
        }
        Ok(())
    }

    pub fn set(&self, id: &str, vector: Vec<f32>) -> Result<()> {
        let mut state = self.state.write();
        Self::check_dim(&state, vector.len())?;
        if state.dim.is_none() {
            state.dim = Some(vector.len());
        }
        state.vectors.insert(id.to_string(), vector);
        write_json_atomic(&self.tmp_dir, &self.path, &state.vectors)
    }

    pub fn remove(&self, id: &str) -> Result<()> {
        let mut state = self.state.write();
        state.vectors.remove(id);
        if state.vectors.is_empty() {
            state.dim = None;
        }
        write_json_atomic(&self.tmp_dir, &self.path, &state.vectors)
    }

    /// Bulk-set; `dim_override` fixes the expected dimension for an empty
    /// index (e.g. restoring from a known-good export).
    pub fn set_bulk(&self, items: Vec<(String, Vec<f32>)>, dim_override: Option<usize>) -> Result<()> {
        let mut state = self.state.write();
        if let Some(dim) = dim_override {
            if state.vectors.is_empty() {
                state.dim = Some(dim);
            }
        }
        for (_, vector) in &items {
            Self::check_dim(&state, vector.len())?;
        }
        for (id, vector) in items {
            if state.dim.is_none() {
                state.dim = Some(vector.len());
            }
            state.vectors.insert(id, vector);
        }
        write_json_atomic(&self.tmp_dir, &self.path, &state.vectors)
    }

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            0.0
        } else {
            dot / (norm_a * norm_b)
        }
    }

    /// Top-k cosine hits. A zero-norm query returns an empty result.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(String, f32)> {
        let norm = query.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            return Vec::new();
        }
        let state = self.state.read();
        let mut scored: Vec<(String, f32)> = state
            .vectors
            .iter()
            .map(|(id, vector)| (id.clone(), Self::cosine(query, vector)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    /// Import `{id, vector}` lines, skipping and counting malformed ones.
    /// Returns `(imported, skipped)`.
    pub fn import_jsonl(&self, path: &Path, dim: Option<usize>) -> Result<(usize, usize)> {
        #[derive(serde::Deserialize)]
        struct Row {
            id: String,
            vector: Vec<f32>,
        }

        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let mut imported = 0usize;
        let mut skipped = 0usize;
        let mut batch = Vec::new();
        for line in reader.lines() {
            let Ok(line) = line else {
                skipped += 1;
                continue;
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Row>(&line) {
                Ok(row) => {
                    imported += 1;
                    batch.push((row.id, row.vector));
                }
                Err(_) => skipped += 1,
            }
        }
        self.set_bulk(batch, dim)?;
        Ok((imported, skipped))
    }

    pub fn dim(&self) -> Option<usize> {
        self.state.read().dim
    }

    pub fn len(&self) -> usize {
        self.state.read().vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn set_then_search_ranks_by_cosine() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::new(dir.path());
        index.set("a", vec![1.0, 0.0]).unwrap();
        index.set("b", vec![0.0, 1.0]).unwrap();
        let results = index.search(&[1.0, 0.0], 2);
        assert_eq!(results[0].0, "a");
    }

    #[test]
    fn zero_norm_query_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::new(dir.path());
        index.set("a", vec![1.0, 0.0]).unwrap();
        assert!(index.search(&[0.0, 0.0], 5).is_empty());
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::new(dir.path());
        index.set("a", vec![1.0, 0.0]).unwrap();
        let err = index.set("b", vec![1.0, 0.0, 0.0]).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }

    #[test]
    fn remove_last_vector_resets_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::new(dir.path());
        index.set("a", vec![1.0, 0.0]).unwrap();
        index.remove("a").unwrap();
        assert!(index.dim().is_none());
        index.set("b", vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(index.dim(), Some(3));
    }

    #[test]
    fn import_jsonl_skips_malformed_lines_and_counts_them() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::new(dir.path());
        let jsonl_path = dir.path().join("import.jsonl");
        let mut file = std::fs::File::create(&jsonl_path).unwrap();
        writeln!(file, r#"{{"id":"a","vector":[1.0,2.0]}}"#).unwrap();
        writeln!(file, "not json").unwrap();
        writeln!(file, r#"{{"id":"b","vector":[3.0,4.0]}}"#).unwrap();
        drop(file);

        let (imported, skipped) = index.import_jsonl(&jsonl_path, None).unwrap();
        assert_eq!(imported, 2);
        assert_eq!(skipped, 1);
        assert_eq!(index.len(), 2);
    }
}
