//! Route table and handlers.

use std::time::Instant;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tower_http::trace::TraceLayer;

use recall_adapters::traits::ProviderUsage;
use recall_context::{
    ContextError, ContextStrategy, GenerationOptions, GenerationResponse, RetrievalOptions,
    TokenUsage, VectorContext,
};
use recall_memory::{MemoryEntry, MemoryStats, OptimizationReport};
use recall_primitives::RequestId;
use recall_telemetry::{MetricsSnapshot, RequestKind};

use crate::error::ApiError;
use crate::state::AppState;

const PROMPT_REQUIRED: &str = "Prompt is required";

/// Builds the router with request tracing.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/context/execute", post(execute))
        .route("/context/query", post(query))
        .route("/context/stats", get(stats))
        .route("/memory", post(write_memory))
        .route("/memory/optimize", post(optimize))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    entries: usize,
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        entries: state.store.len().await,
    })
}

/// `POST /context/execute` body.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExecuteRequest {
    /// Required; missing or blank yields 400.
    pub prompt: Option<String>,
    /// Generation and retrieval options.
    pub options: GenerationOptions,
}

/// `POST /context/execute` response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    /// Generated text.
    pub result: String,
    /// Estimated token usage.
    pub usage: TokenUsage,
    /// Provenance and timing.
    pub metadata: ExecuteMetadata,
}

/// Metadata section of [`ExecuteResponse`].
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteMetadata {
    /// Request identifier.
    pub request_id: RequestId,
    /// Model used.
    pub model: String,
    /// Oracle provider.
    pub provider: String,
    /// Context was part of the prompt.
    pub hybrid: bool,
    /// Wall time in milliseconds.
    pub execution_time_ms: u64,
    /// Retrieval provenance.
    pub vector_context: VectorContext,
    /// Provider-reported usage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_usage: Option<ProviderUsage>,
}

impl From<GenerationResponse> for ExecuteResponse {
    fn from(response: GenerationResponse) -> Self {
        Self {
            result: response.text,
            usage: response.usage,
            metadata: ExecuteMetadata {
                request_id: response.request_id,
                model: response.model,
                provider: response.provider,
                hybrid: response.hybrid,
                execution_time_ms: response.execution_time_ms,
                vector_context: response.vector_context,
                provider_usage: response.provider_usage,
            },
        }
    }
}

async fn execute(
    State(state): State<AppState>,
    payload: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let Json(request) = payload?;
    let prompt = request.prompt.unwrap_or_default();
    let response = state.coordinator.execute(&prompt, &request.options).await?;
    Ok(Json(response.into()))
}

/// `POST /context/query` body.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct QueryRequest {
    /// Text to retrieve context for.
    pub prompt: Option<String>,
    /// Retrieval options.
    pub options: RetrievalOptions,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContextHit<'a> {
    #[serde(flatten)]
    entry: &'a MemoryEntry,
    score: f64,
    similarity: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse<'a> {
    strategy: ContextStrategy,
    context_results: Vec<ContextHit<'a>>,
}

async fn query(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload?;
    let started = Instant::now();
    let prompt = request.prompt.unwrap_or_default();
    let result = if prompt.trim().is_empty() {
        Err(ContextError::invalid_argument(PROMPT_REQUIRED))
    } else {
        state.coordinator.retriever().retrieve(&prompt, &request.options).await
    };

    match result {
        Ok(retrieved) => {
            state
                .metrics
                .record_success(RequestKind::Query, started.elapsed());
            let body = QueryResponse {
                strategy: retrieved.plan.strategy,
                context_results: retrieved
                    .results
                    .iter()
                    .map(|hit| ContextHit {
                        entry: &hit.entry,
                        score: hit.score,
                        similarity: hit.similarity,
                    })
                    .collect(),
            };
            serde_json::to_value(body)
                .map(Json)
                .map_err(|err| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))
        }
        Err(err) => {
            state
                .metrics
                .record_failure(RequestKind::Query, err.category(), started.elapsed());
            Err(err.into())
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    #[serde(flatten)]
    metrics: MetricsSnapshot,
    memory_stats: MemoryStats,
}

async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        metrics: state.metrics.snapshot(),
        memory_stats: state.store.stats().await,
    })
}

/// `POST /memory` body.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MemoryWriteRequest {
    /// Entry text.
    pub text: Option<String>,
    /// Arbitrary metadata.
    pub metadata: Map<String, Value>,
    /// Stored as `importance` metadata; must lie in `[0, 1]`.
    pub importance: Option<f64>,
    /// Stored as `tags` metadata.
    pub tags: Vec<String>,
}

async fn write_memory(
    State(state): State<AppState>,
    payload: Result<Json<MemoryWriteRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<MemoryEntry>), ApiError> {
    let Json(request) = payload?;
    let started = Instant::now();
    let text = request.text.unwrap_or_default();
    let result = if text.trim().is_empty() {
        Err(ContextError::invalid_argument("Text is required"))
    } else {
        let mut metadata = request.metadata;
        if let Some(importance) = request.importance {
            metadata.insert("importance".into(), Value::from(importance));
        }
        if !request.tags.is_empty() {
            metadata.insert("tags".into(), Value::from(request.tags));
        }
        state.coordinator.retriever().remember(&text, metadata).await
    };

    match result {
        Ok(entry) => {
            state
                .metrics
                .record_success(RequestKind::MemoryWrite, started.elapsed());
            Ok((StatusCode::CREATED, Json(MemoryEntry::clone(&entry))))
        }
        Err(err) => {
            state
                .metrics
                .record_failure(RequestKind::MemoryWrite, err.category(), started.elapsed());
            Err(err.into())
        }
    }
}

async fn optimize(State(state): State<AppState>) -> Json<OptimizationReport> {
    Json(state.store.optimize_memory().await)
}
