//! Remote [`EmbeddingFunction`] implementations.
//!
//! Both embedders share the HTTPS client used by the chat adapters. Every
//! failure, including a timeout or a vector of the wrong width, surfaces as
//! [`MemoryError::Embedding`].

use std::fmt;
use std::num::NonZeroUsize;
use std::time::Duration;

use async_trait::async_trait;
use hyper::Uri;
use recall_memory::{EmbeddingFunction, EmbeddingVector, MemoryError, MemoryResult};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::http_client::{HyperClient, JsonCall, build_https_client, endpoint, sanitize_base_url};
use crate::traits::{AdapterError, AdapterResult};
use crate::{ollama, openai};

/// Settings shared by the remote embedders.
#[derive(Clone)]
pub struct EmbeddingConfig {
    model: String,
    dimensions: NonZeroUsize,
    base_url: Option<String>,
    api_key: Option<String>,
    timeout: Duration,
}

impl fmt::Debug for EmbeddingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingConfig")
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl EmbeddingConfig {
    /// Creates settings for `model`, which must return `dimensions`-wide vectors.
    #[must_use]
    pub fn new(model: impl Into<String>, dimensions: NonZeroUsize) -> Self {
        Self {
            model: model.into(),
            dimensions,
            base_url: None,
            api_key: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Overrides the provider's default base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Supplies an API key.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self, provider: &str, default_base: &str, path: &str) -> AdapterResult<Uri> {
        let base = sanitize_base_url(provider, self.base_url.as_deref().unwrap_or(default_base))?;
        endpoint(provider, &base, path)
    }
}

struct RemoteEmbedder {
    client: HyperClient,
    endpoint: Uri,
    config: EmbeddingConfig,
    provider: &'static str,
}

impl RemoteEmbedder {
    async fn call<P, R>(&self, payload: &P) -> MemoryResult<R>
    where
        P: Serialize + Sync,
        R: for<'de> Deserialize<'de>,
    {
        let call = JsonCall {
            provider: self.provider,
            endpoint: &self.endpoint,
            bearer: self.config.api_key.as_deref(),
            timeout: self.config.timeout,
        };
        call.send(&self.client, payload).await.map_err(|err| {
            warn!(provider = self.provider, error = %err, "embedding request failed");
            MemoryError::embedding(err.to_string())
        })
    }

    fn vector(&self, values: &[f64]) -> MemoryResult<EmbeddingVector> {
        let expected = self.config.dimensions.get();
        if values.len() != expected {
            return Err(MemoryError::embedding(format!(
                "{} returned {} dimensions, expected {expected}",
                self.provider,
                values.len()
            )));
        }
        EmbeddingVector::from_f64(values).map_err(|err| MemoryError::embedding(err.to_string()))
    }
}

/// Embeds text with `OpenAI`'s `/v1/embeddings` endpoint.
pub struct OpenAiEmbedder {
    inner: RemoteEmbedder,
}

impl fmt::Debug for OpenAiEmbedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiEmbedder")
            .field("model", &self.inner.config.model)
            .field("endpoint", &self.inner.endpoint)
            .finish_non_exhaustive()
    }
}

impl OpenAiEmbedder {
    /// Creates the embedder.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Configuration`] when no API key is set or the
    /// base URL is invalid.
    pub fn new(config: EmbeddingConfig) -> AdapterResult<Self> {
        if config.api_key.as_deref().is_none_or(|key| key.trim().is_empty()) {
            return Err(AdapterError::configuration(
                "OpenAI embeddings require an API key",
            ));
        }
        let endpoint = config.endpoint(openai::PROVIDER, openai::DEFAULT_BASE_URL, "v1/embeddings")?;
        Ok(Self {
            inner: RemoteEmbedder {
                client: build_https_client()?,
                endpoint,
                config,
                provider: openai::PROVIDER,
            },
        })
    }
}

#[async_trait]
impl EmbeddingFunction for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> MemoryResult<EmbeddingVector> {
        let payload = OpenAiEmbeddingRequest {
            model: &self.inner.config.model,
            input: text,
        };
        let response: OpenAiEmbeddingResponse = self.inner.call(&payload).await?;
        let values = response
            .data
            .into_iter()
            .next()
            .map(|datum| datum.embedding)
            .ok_or_else(|| MemoryError::embedding("OpenAI returned no embeddings"))?;
        self.inner.vector(&values)
    }

    fn dimensions(&self) -> usize {
        self.inner.config.dimensions.get()
    }

    fn name(&self) -> &str {
        &self.inner.config.model
    }
}

/// Embeds text with Ollama's `/api/embeddings` endpoint.
pub struct OllamaEmbedder {
    inner: RemoteEmbedder,
}

impl fmt::Debug for OllamaEmbedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OllamaEmbedder")
            .field("model", &self.inner.config.model)
            .field("endpoint", &self.inner.endpoint)
            .finish_non_exhaustive()
    }
}

impl OllamaEmbedder {
    /// Creates the embedder.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Configuration`] when the base URL is invalid.
    pub fn new(config: EmbeddingConfig) -> AdapterResult<Self> {
        let endpoint = config.endpoint(ollama::PROVIDER, ollama::DEFAULT_BASE_URL, "api/embeddings")?;
        Ok(Self {
            inner: RemoteEmbedder {
                client: build_https_client()?,
                endpoint,
                config,
                provider: ollama::PROVIDER,
            },
        })
    }
}

#[async_trait]
impl EmbeddingFunction for OllamaEmbedder {
    async fn embed(&self, text: &str) -> MemoryResult<EmbeddingVector> {
        let payload = OllamaEmbeddingRequest {
            model: &self.inner.config.model,
            prompt: text,
        };
        let response: OllamaEmbeddingResponse = self.inner.call(&payload).await?;
        self.inner.vector(&response.embedding)
    }

    fn dimensions(&self) -> usize {
        self.inner.config.dimensions.get()
    }

    fn name(&self) -> &str {
        &self.inner.config.model
    }
}

#[derive(Debug, Serialize)]
struct OpenAiEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    #[serde(default)]
    data: Vec<OpenAiEmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingDatum {
    embedding: Vec<f64>,
}

#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn openai_embedder_requires_key() {
        let err = OpenAiEmbedder::new(EmbeddingConfig::new("text-embedding-3-small", dims(1536)))
            .expect_err("key required");
        assert!(matches!(err, AdapterError::Configuration { .. }));
    }

    #[test]
    fn endpoints_follow_base_url() {
        let embedder = OllamaEmbedder::new(
            EmbeddingConfig::new("nomic-embed-text", dims(768)).with_base_url("http://gpu-box:11434"),
        )
        .unwrap();
        assert_eq!(embedder.inner.endpoint.host(), Some("gpu-box"));
        assert_eq!(embedder.inner.endpoint.path(), "/api/embeddings");

        let embedder = OpenAiEmbedder::new(
            EmbeddingConfig::new("text-embedding-3-small", dims(1536)).with_api_key("k"),
        )
        .unwrap();
        assert_eq!(embedder.inner.endpoint.path(), "/v1/embeddings");
        assert_eq!(embedder.dimensions(), 1536);
    }

    #[test]
    fn wrong_width_is_an_embedding_error() {
        let embedder =
            OllamaEmbedder::new(EmbeddingConfig::new("nomic-embed-text", dims(3))).unwrap();
        let err = embedder.inner.vector(&[0.1, 0.2]).unwrap_err();
        assert!(matches!(err, MemoryError::Embedding { .. }));
        assert_eq!(embedder.inner.vector(&[0.1, 0.2, 0.3]).unwrap().len(), 3);
    }

    #[test]
    fn parses_provider_payloads() {
        let openai: OpenAiEmbeddingResponse =
            serde_json::from_str(r#"{"data":[{"embedding":[0.5,-0.5],"index":0}],"model":"m"}"#)
                .unwrap();
        assert_eq!(openai.data[0].embedding, vec![0.5, -0.5]);

        let ollama: OllamaEmbeddingResponse =
            serde_json::from_str(r#"{"embedding":[1.0,2.0,3.0]}"#).unwrap();
        assert_eq!(ollama.embedding.len(), 3);
    }

    #[tokio::test]
    async fn unreachable_backend_is_an_embedding_error() {
        let embedder = OllamaEmbedder::new(
            EmbeddingConfig::new("nomic-embed-text", dims(3))
                .with_base_url("http://127.0.0.1:1")
                .with_timeout(Duration::from_secs(5)),
        )
        .unwrap();
        let err = embedder.embed("hello").await.unwrap_err();
        assert!(matches!(err, MemoryError::Embedding { .. }));
    }
}
