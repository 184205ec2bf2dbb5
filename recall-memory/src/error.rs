//! Error types for the memory subsystem.

use serde_json::Error as SerdeError;
use thiserror::Error;

/// Errors emitted by memory components.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// The provided configuration was invalid.
    #[error("invalid memory configuration: {0}")]
    InvalidConfig(&'static str),
    /// Memory entry contents or metadata failed validation.
    #[error("invalid memory entry: {0}")]
    InvalidRecord(&'static str),
    /// A vector did not match the dimensionality fixed for the store.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimensionality configured for the store.
        expected: usize,
        /// Dimensionality of the offending vector.
        actual: usize,
    },
    /// The embedding function failed or returned malformed output.
    #[error("embedding failed: {reason}")]
    Embedding {
        /// Human-readable reason describing the failure.
        reason: String,
    },
    /// Serialization or deserialization error.
    #[error("serialization error: {source}")]
    Serialization {
        /// Source [`serde_json::Error`].
        #[from]
        source: SerdeError,
    },
}

impl MemoryError {
    /// Helper to construct embedding errors from string-like values.
    #[must_use]
    pub fn embedding(reason: impl Into<String>) -> Self {
        Self::Embedding {
            reason: reason.into(),
        }
    }
}

impl From<recall_primitives::Error> for MemoryError {
    fn from(err: recall_primitives::Error) -> Self {
        match err {
            recall_primitives::Error::ScoreOutOfRange { .. } => {
                Self::InvalidRecord("importance and confidence must lie in [0, 1]")
            }
            recall_primitives::Error::InvalidId { .. } => {
                Self::InvalidRecord("memory identifier is not a valid UUID")
            }
        }
    }
}

/// Result type alias for memory operations.
pub type MemoryResult<T> = Result<T, MemoryError>;
