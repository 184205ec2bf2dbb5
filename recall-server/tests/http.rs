use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use futures::stream;
use serde_json::{Value, json};
use tower::ServiceExt;

use recall_adapters::traits::{
    AdapterError, AdapterMetadata, AdapterResult, AdapterStream, InferenceChunk, InferenceRequest,
    ModelAdapter,
};
use recall_config::{ServiceConfig, Strategy};
use recall_server::{Services, build_with_oracle, router};

struct EchoAdapter {
    metadata: AdapterMetadata,
}

#[async_trait]
impl ModelAdapter for EchoAdapter {
    fn metadata(&self) -> &AdapterMetadata {
        &self.metadata
    }

    async fn infer(&self, _request: InferenceRequest) -> AdapterResult<AdapterStream> {
        let chunk = InferenceChunk::new("the answer", true);
        Ok(Box::pin(stream::once(async move { Ok(chunk) })))
    }
}

struct DownAdapter {
    metadata: AdapterMetadata,
}

#[async_trait]
impl ModelAdapter for DownAdapter {
    fn metadata(&self) -> &AdapterMetadata {
        &self.metadata
    }

    async fn infer(&self, _request: InferenceRequest) -> AdapterResult<AdapterStream> {
        Err(AdapterError::transport("connection refused"))
    }
}

fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.store.dimensions = 64;
    config.retrieval.strategy = Strategy::Standard;
    config.retrieval.threshold = 0.3;
    config.compaction.interval_secs = 0;
    config
}

fn services(adapter: Arc<dyn ModelAdapter>) -> Services {
    build_with_oracle(&test_config(), adapter).unwrap()
}

fn echo_services() -> Services {
    services(Arc::new(EchoAdapter {
        metadata: AdapterMetadata::new("test", "echo-model"),
    }))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn missing_prompt_is_rejected() {
    let services = echo_services();
    let app = router(services.state.clone());

    let (status, body) = send(&app, Method::POST, "/context/execute", Some(json!({}))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "Prompt is required" }));
    let snapshot = services.state.metrics.snapshot();
    assert_eq!(snapshot.request_counts.failed, 1);
    assert_eq!(snapshot.errors.get("invalid_argument"), Some(&1));
}

#[tokio::test]
async fn execute_uses_stored_memory() {
    let services = echo_services();
    let app = router(services.state.clone());

    let (status, _) = send(
        &app,
        Method::POST,
        "/memory",
        Some(json!({ "text": "the deploy runs every friday", "importance": 0.9 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &app,
        Method::POST,
        "/context/execute",
        Some(json!({ "prompt": "the deploy runs every friday" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "the answer");
    assert_eq!(body["metadata"]["provider"], "test");
    assert_eq!(body["metadata"]["model"], "echo-model");
    assert_eq!(body["metadata"]["hybrid"], true);
    assert_eq!(body["metadata"]["vectorContext"]["used"], true);
    assert_eq!(
        body["metadata"]["vectorContext"]["results"]
            .as_array()
            .map(Vec::len),
        Some(1)
    );
    assert!(body["usage"]["totalTokens"].as_u64().unwrap() > 0);
    assert_eq!(services.state.metrics.snapshot().request_counts.hybrid, 1);
}

#[tokio::test]
async fn execute_without_vector_memory_is_plain_generation() {
    let services = echo_services();
    let app = router(services.state.clone());
    send(
        &app,
        Method::POST,
        "/memory",
        Some(json!({ "text": "the deploy runs every friday" })),
    )
    .await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/context/execute",
        Some(json!({
            "prompt": "the deploy runs every friday",
            "options": { "useVectorMemory": false }
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["metadata"]["hybrid"], false);
    assert_eq!(body["metadata"]["vectorContext"]["used"], false);
}

#[tokio::test]
async fn query_returns_ranked_entries() {
    let services = echo_services();
    let app = router(services.state.clone());
    for text in ["alpha beta gamma", "completely unrelated words here"] {
        send(&app, Method::POST, "/memory", Some(json!({ "text": text }))).await;
    }

    let (status, body) = send(
        &app,
        Method::POST,
        "/context/query",
        Some(json!({ "prompt": "alpha beta gamma", "options": { "limit": 1 } })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["strategy"], "standard");
    let results = body["contextResults"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["text"], "alpha beta gamma");
    assert!(results[0]["score"].as_f64().unwrap() > 0.9);
    assert!(results[0]["id"].is_string());
}

#[tokio::test]
async fn query_requires_prompt() {
    let services = echo_services();
    let app = router(services.state.clone());

    let (status, body) =
        send(&app, Method::POST, "/context/query", Some(json!({ "prompt": "  " }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Prompt is required");
}

#[tokio::test]
async fn stats_reports_counts_latency_and_memory() {
    let services = echo_services();
    let app = router(services.state.clone());
    send(&app, Method::POST, "/memory", Some(json!({ "text": "one entry" }))).await;
    send(
        &app,
        Method::POST,
        "/context/execute",
        Some(json!({ "prompt": "hello" })),
    )
    .await;

    let (status, body) = send(&app, Method::GET, "/context/stats", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["requestCounts"]["execute"], 1);
    assert_eq!(body["requestCounts"]["memoryWrite"], 1);
    assert_eq!(body["requestCounts"]["succeeded"], 2);
    assert_eq!(body["latencyPercentiles"]["samples"], 2);
    assert_eq!(body["memoryStats"]["entries"], 1);
    assert_eq!(body["memoryStats"]["dimensions"], 64);
}

#[tokio::test]
async fn memory_write_rejects_out_of_range_importance() {
    let services = echo_services();
    let app = router(services.state.clone());

    let (status, body) = send(
        &app,
        Method::POST,
        "/memory",
        Some(json!({ "text": "something", "importance": 2.0 })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("invalid memory entry"));
    assert!(services.state.store.is_empty().await);
}

#[tokio::test]
async fn memory_write_requires_text() {
    let services = echo_services();
    let app = router(services.state.clone());

    let (status, body) = send(&app, Method::POST, "/memory", Some(json!({ "tags": ["a"] }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Text is required");
}

#[tokio::test]
async fn memory_write_stores_tags() {
    let services = echo_services();
    let app = router(services.state.clone());

    let (status, body) = send(
        &app,
        Method::POST,
        "/memory",
        Some(json!({ "text": "tagged", "tags": ["ops"], "metadata": { "source": "runbook" } })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["metadata"]["tags"], json!(["ops"]));
    assert_eq!(body["metadata"]["source"], "runbook");
}

#[tokio::test]
async fn optimize_and_health_respond() {
    let services = echo_services();
    let app = router(services.state.clone());
    send(&app, Method::POST, "/memory", Some(json!({ "text": "kept" }))).await;

    let (status, _) = send(&app, Method::POST, "/memory/optimize", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok", "entries": 1 }));
}

#[tokio::test]
async fn oracle_failure_maps_to_bad_gateway() {
    let services = services(Arc::new(DownAdapter {
        metadata: AdapterMetadata::new("test", "down"),
    }));
    let app = router(services.state.clone());

    let (status, body) = send(
        &app,
        Method::POST,
        "/context/execute",
        Some(json!({ "prompt": "hello" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("connection refused"));
    assert_eq!(
        services.state.metrics.snapshot().errors.get("generation_failed"),
        Some(&1)
    );
}

#[tokio::test]
async fn malformed_json_is_bad_request() {
    let services = echo_services();
    let app = router(services.state.clone());
    let request = Request::builder()
        .method(Method::POST)
        .uri("/context/execute")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn write_back_limits_follow_config() {
    let mut config = test_config();
    config.generation.write_back_concurrency = 2;
    config.generation.write_back_backlog = 8;
    let adapter = Arc::new(EchoAdapter {
        metadata: AdapterMetadata::new("test", "echo-model"),
    });

    let services = build_with_oracle(&config, adapter).unwrap();

    let limits = services.write_back.config();
    assert_eq!(limits.max_concurrency().get(), 2);
    assert_eq!(limits.max_backlog(), 8);
}

#[tokio::test]
async fn shutdown_drains_write_back() {
    let services = echo_services();
    let app = router(services.state.clone());
    send(
        &app,
        Method::POST,
        "/context/execute",
        Some(json!({ "prompt": "remember this exchange", "options": { "writeBack": true } })),
    )
    .await;

    let store = Arc::clone(&services.state.store);
    services.shutdown(std::time::Duration::from_secs(5)).await;

    assert_eq!(store.len().await, 1);
}
