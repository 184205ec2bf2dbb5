//! Shared error definitions for recall primitives.

use thiserror::Error;
use uuid::Error as UuidError;

/// Result alias used by the primitive types.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while constructing primitive types.
#[derive(Debug, Error)]
pub enum Error {
    /// The provided identifier could not be parsed.
    #[error("invalid identifier: {source}")]
    InvalidId {
        /// Source parsing error from the UUID library.
        #[from]
        source: UuidError,
    },

    /// A score fell outside the closed unit interval.
    #[error("score `{field}` must lie in [0, 1], got {value}")]
    ScoreOutOfRange {
        /// Name of the field being validated.
        field: &'static str,
        /// The rejected value.
        value: f64,
    },
}
