//! Core shared types for the recall context service.

#![warn(missing_docs, clippy::pedantic)]

mod error;
mod ids;
mod score;

/// Error type and result alias shared across the workspace.
pub use error::{Error, Result};
/// Identifiers for memory entries and generation requests.
pub use ids::{MemoryId, RequestId};
/// Scores constrained to the closed unit interval.
pub use score::UnitScore;
