//! State shared by every handler.

use std::sync::Arc;

use recall_context::GenerationCoordinator;
use recall_memory::EmbeddingStore;
use recall_telemetry::ServiceMetrics;

/// Cheaply clonable handle to the service objects.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Generation entry point; also owns the retriever.
    pub coordinator: Arc<GenerationCoordinator>,
    /// Shared embedding store.
    pub store: Arc<EmbeddingStore>,
    /// Request metrics.
    pub metrics: Arc<ServiceMetrics>,
}
