//! Error types for the memory engine

use thiserror::Error;

/// Result type alias using the engine's [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the memory engine
#[derive(Debug, Error)]
pub enum Error {
    // ============ Lookup Errors ============
    /// Item, scope, or file missing when the operation required it
    #[error("not found: {0}")]
    NotFound(String),

    // ============ Durability Errors ============
    /// JSON parse failure in a durable file; callers should fall back to empty
    /// defaults or a full replay rather than propagate this to the user
    #[error("corrupt durable file {path}: {message}")]
    Corrupt {
        /// Path of the file that failed to parse
        path: String,
        /// Underlying parse error message
        message: String,
    },

    /// Another holder owns an advisory lock and it is not stale
    #[error("locked: {0}")]
    Locked(String),

    // ============ Policy Errors ============
    /// A committed-scope upsert violated the configured sensitivity ceiling
    #[error("sensitivity policy violation: item is {actual} but ceiling is {max}")]
    SensitivityPolicy {
        /// Sensitivity of the rejected item
        actual: String,
        /// Configured ceiling for the scope
        max: String,
    },

    /// A vector had the wrong arity for the scope's established dimension
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension already established for the scope
        expected: usize,
        /// Dimension of the rejected vector
        actual: usize,
    },

    // ============ Config Errors ============
    /// Config was unparsable or out of range; the previous valid config is retained
    #[error("invalid config: {0}")]
    ConfigInvalid(String),

    // ============ Transport Errors ============
    /// Underlying filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal invariant violation; should not be reachable in correct operation
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// `true` for errors where the caller should treat the read as degraded
    /// (empty catalog / empty index) rather than fail the whole operation.
    pub fn is_recoverable_read_error(&self) -> bool {
        matches!(self, Error::Corrupt { .. } | Error::NotFound(_))
    }
}
