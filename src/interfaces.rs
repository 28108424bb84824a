//! Pure-function interfaces the engine depends on but does not own.
//!
//! Redaction, tokenization, and id generation are treated as external
//! collaborators. The implementations here are minimal,
//! deterministic placeholders that satisfy the contract; callers embedding
//! this crate are expected to swap in richer heuristics.

use std::sync::atomic::{AtomicU64, Ordering};

/// A value redacted from free text, with a stable hash reference recorded in
/// [`crate::model::Security::secret_hash_refs`] instead of the raw secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedactionRef(pub String);

/// `redact(text) -> (text', refs[])`.
///
/// This placeholder performs no redaction (it returns the text unchanged and
/// no refs); it exists so the rest of the write path has a single seam to
/// call through. Swap in real secret-detection heuristics here.
pub fn redact(text: &str) -> (String, Vec<RedactionRef>) {
    (text.to_string(), Vec::new())
}

/// `tokenize(text) -> [token]`: lowercase, alphanumeric tokens, splitting on
/// any non-alphanumeric byte and dropping empty spans. Deterministic, as
/// required by the BM25 indexer's contract.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// `newId() -> string`, monotonic per process.
///
/// Real deployments should use a proper ULID generator; this placeholder
/// produces a lexicographically sortable id from a millisecond timestamp and
/// a per-process monotonic counter, which is sufficient to satisfy the
/// "opaque monotonic string" contract in tests and single-process use.
pub fn new_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let seq = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{millis:013x}{seq:08x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_lowercases_and_splits() {
        assert_eq!(
            tokenize("Hello, World! foo_bar 123"),
            vec!["hello", "world", "foo", "bar", "123"]
        );
    }

    #[test]
    fn tokenize_drops_empties() {
        assert_eq!(tokenize("  --  "), Vec::<String>::new());
    }

    #[test]
    fn new_id_is_monotonic() {
        let a = new_id();
        let b = new_id();
        assert!(b > a);
    }

    #[test]
    fn redact_is_a_passthrough_placeholder() {
        let (text, refs) = redact("sk-fake-key-123");
        assert_eq!(text, "sk-fake-key-123");
        assert!(refs.is_empty());
    }
}
