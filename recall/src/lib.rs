//! Vector-memory-backed context retrieval and generation SDK facade.
//!
//! Bundles the recall crates behind feature flags so embedders can pull in
//! only the store, or the full coordinator, or the HTTP surface.

#![warn(missing_docs, clippy::pedantic)]

/// Shared identifiers, scores and errors.
pub use recall_primitives as primitives;

/// Embedding store (enabled by `memory` feature).
#[cfg(feature = "memory")]
pub use recall_memory as memory;

/// Generation oracles and remote embedders (enabled by `adapters` feature).
#[cfg(feature = "adapters")]
pub use recall_adapters as adapters;

/// Context assembly and prompt templates (enabled by `prompts` feature).
#[cfg(feature = "prompts")]
pub use recall_prompts as prompts;

/// Retrieval and generation coordination (enabled by `context` feature).
#[cfg(feature = "context")]
pub use recall_context as context;

/// Metrics and tracing setup (enabled by `telemetry` feature).
#[cfg(feature = "telemetry")]
pub use recall_telemetry as telemetry;

/// Configuration loading (enabled by `config` feature).
#[cfg(feature = "config")]
pub use recall_config as config;

/// HTTP surface (enabled by `server` feature).
#[cfg(feature = "server")]
pub use recall_server as server;
