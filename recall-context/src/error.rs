//! Error taxonomy for retrieval and generation.

use std::time::Duration;

use recall_memory::MemoryError;
use recall_prompts::TemplateError;
use thiserror::Error;

use crate::lifecycle::LifecycleError;

/// Errors surfaced by the retriever and the coordinator.
#[derive(Debug, Error)]
pub enum ContextError {
    /// Missing or malformed caller input.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong with the input.
        reason: String,
    },

    /// The embedding function failed, timed out or returned malformed output.
    #[error("embedding failed: {reason}")]
    EmbeddingFailed {
        /// Underlying failure.
        reason: String,
    },

    /// The generation oracle failed or timed out.
    #[error("generation failed after {elapsed:?}: {reason}")]
    GenerationFailed {
        /// Underlying oracle error.
        reason: String,
        /// Time spent on the request before the failure.
        elapsed: Duration,
        /// Whether the failure was a timeout.
        timed_out: bool,
    },

    /// The embedding store rejected an operation.
    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// The system prompt template could not be rendered.
    #[error(transparent)]
    Prompt(#[from] TemplateError),

    /// The per-request state machine was driven out of order.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl ContextError {
    /// Convenience constructor for invalid input.
    #[must_use]
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Stable label used in logs and metrics.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::EmbeddingFailed { .. } => "embedding_failed",
            Self::GenerationFailed { .. } => "generation_failed",
            Self::Memory(_) => "memory",
            Self::Prompt(_) | Self::Lifecycle(_) => "internal",
        }
    }

    /// Returns `true` for errors caused by caller input, including store
    /// rejections of malformed vectors or metadata.
    #[must_use]
    pub const fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument { .. }
                | Self::Memory(MemoryError::DimensionMismatch { .. } | MemoryError::InvalidRecord(_))
        )
    }

    /// Returns `true` for a generation timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::GenerationFailed { timed_out: true, .. })
    }
}

/// Result alias for context operations.
pub type ContextResult<T> = Result<T, ContextError>;
