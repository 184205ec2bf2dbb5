//! Vector memory for the recall context service.
//!
//! [`EmbeddingStore`] holds `(text, embedding, metadata)` entries, answers
//! time-weighted and diversity-aware similarity queries, and keeps itself
//! inside entry, text and metadata budgets through eviction and the
//! [`optimizer`] passes.

#![warn(missing_docs, clippy::pedantic)]

pub mod config;
pub mod embedder;
pub mod embeddings;
pub mod entry;
pub mod optimizer;
pub mod scoring;
pub mod store;

mod error;

pub use config::{EvictionWeights, StoreConfig, TimeDecay};
pub use embedder::{EmbeddingFunction, HashEmbedder};
pub use embeddings::{EmbeddingPrecision, EmbeddingVector, StoredEmbedding};
pub use entry::{MemoryEntry, NewMemory};
pub use error::{MemoryError, MemoryResult};
pub use optimizer::OptimizationReport;
pub use store::{EmbeddingStore, MemoryStats, RetrievalResult, SearchOptions};
