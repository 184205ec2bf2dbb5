//! Context retrieval and context-augmented generation.
//!
//! [`ContextRetriever`] embeds a query and searches the shared
//! [`EmbeddingStore`](recall_memory::EmbeddingStore) under a
//! [`ContextStrategy`]. [`GenerationCoordinator`] merges the retrieved context
//! into an oracle request, degrades to context-free generation when retrieval
//! fails, and optionally writes the exchange back into memory.

#![warn(missing_docs, clippy::pedantic)]

mod error;

pub mod compaction;
pub mod coordinator;
pub mod lifecycle;
pub mod retrieval;
pub mod scheduler;
pub mod sink;

pub use compaction::CompactionTask;
pub use coordinator::{
    ContextProvenance, GenerationConfig, GenerationCoordinator, GenerationOptions,
    GenerationResponse, TokenUsage, VectorContext,
};
pub use error::{ContextError, ContextResult};
pub use lifecycle::{LifecycleError, RequestEvent, RequestLifecycle, RequestState};
pub use retrieval::{
    ContextRetriever, ContextStrategy, RetrievalConfig, RetrievalOptions, RetrievalPlan,
    RetrievedContext, plan,
};
pub use scheduler::{SchedulerConfig, SchedulerError, WriteBackScheduler};
pub use sink::{
    CollectingSink, CompositeSink, ExecutionOutcome, ExecutionRecord, ExecutionSink,
    TracingExecutionSink,
};
