//! Per-scope search indexes: the BM25 inverted index and the cosine vector
//! index. Neither index is durability-critical —
//! both are eventually consistent projections the manager can always rebuild
//! from `items/`.

pub mod bm25;
pub mod flush;
pub mod vector;

pub use bm25::{FieldWeights, InvertedIndex};
pub use flush::PendingIndexOps;
pub use vector::VectorIndex;
