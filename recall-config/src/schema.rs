//! Strongly typed configuration schema. Every section has documented
//! defaults, so an empty file is a complete configuration.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;

use crate::{ConfigError, ConfigResult};

/// Root of the configuration file.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// HTTP listener.
    pub server: ServerSettings,
    /// Log output.
    pub logging: LoggingSettings,
    /// Embedding store.
    pub store: StoreSettings,
    /// Retrieval defaults.
    pub retrieval: RetrievalSettings,
    /// Generation defaults.
    pub generation: GenerationSettings,
    /// Generation oracle.
    pub oracle: OracleSettings,
    /// Embedding function.
    pub embedding: EmbeddingSettings,
    /// Periodic compaction.
    pub compaction: CompactionSettings,
}

/// `[server]`
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSettings {
    /// Listen address. Default `127.0.0.1:8080`.
    pub bind: String,
    /// Seconds allowed for in-flight work at shutdown. Default 10.
    pub shutdown_grace_secs: u64,
}

impl ServerSettings {
    /// Parsed listen address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `bind` is not `host:port`.
    pub fn bind_addr(&self) -> ConfigResult<SocketAddr> {
        self.bind
            .parse()
            .map_err(|err| ConfigError::invalid("server.bind", format!("{err}")))
    }

    /// Shutdown grace period.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_owned(),
            shutdown_grace_secs: 10,
        }
    }
}

/// `[logging]`
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset. Default `info`.
    pub filter: String,
    /// Emit JSON lines instead of text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_owned(),
            json: false,
        }
    }
}

/// `[store]`
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreSettings {
    /// Embedding width. Default 1536.
    pub dimensions: usize,
    /// Capacity. Default 1000.
    pub max_entries: usize,
    /// Longest stored text in characters. Default 1000.
    pub max_text_length: usize,
    /// Metadata budget in serialized bytes. Default 2048.
    pub max_metadata_bytes: usize,
    /// 32, 16 or 8. Default 32.
    pub embedding_precision_bits: u8,
    /// Entry lifetime; absent disables expiry.
    pub ttl_secs: Option<u64>,
    /// Score decay by age.
    pub time_decay: TimeDecaySettings,
    /// Eviction value weights.
    pub eviction: EvictionSettings,
}

impl StoreSettings {
    /// Entry lifetime.
    #[must_use]
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            dimensions: 1536,
            max_entries: 1000,
            max_text_length: 1000,
            max_metadata_bytes: 2048,
            embedding_precision_bits: 32,
            ttl_secs: None,
            time_decay: TimeDecaySettings::default(),
            eviction: EvictionSettings::default(),
        }
    }
}

/// `[store.time_decay]`
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeDecaySettings {
    /// Weight search scores by age. Default `true`.
    pub enabled: bool,
    /// Default 30.
    pub half_life_days: f64,
    /// Default 1.5.
    pub max_boost: f64,
}

impl Default for TimeDecaySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            half_life_days: 30.0,
            max_boost: 1.5,
        }
    }
}

/// `[store.eviction]`
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvictionSettings {
    /// Default 0.5.
    pub recency_weight: f64,
    /// Default 0.5.
    pub importance_weight: f64,
}

impl Default for EvictionSettings {
    fn default() -> Self {
        Self {
            recency_weight: 0.5,
            importance_weight: 0.5,
        }
    }
}

/// Context strategy names accepted in configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Parameters as configured.
    Standard,
    /// Query-length heuristics.
    #[default]
    Smart,
    /// High threshold, high confidence.
    Analytical,
}

/// `[retrieval]`
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrievalSettings {
    /// Default 5.
    pub limit: usize,
    /// Default 0.7.
    pub threshold: f64,
    /// Default 0.5.
    pub diversity_factor: f64,
    /// Default `smart`.
    pub strategy: Strategy,
    /// Default 10000.
    pub embedding_timeout_ms: u64,
}

impl RetrievalSettings {
    /// Embedding call timeout.
    #[must_use]
    pub const fn embedding_timeout(&self) -> Duration {
        Duration::from_millis(self.embedding_timeout_ms)
    }
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            limit: 5,
            threshold: 0.7,
            diversity_factor: 0.5,
            strategy: Strategy::default(),
            embedding_timeout_ms: 10_000,
        }
    }
}

/// `[generation]`
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerationSettings {
    /// Model used when a request names none; falls back to `oracle.model`.
    pub default_model: Option<String>,
    /// Default 0.7.
    pub temperature: f32,
    /// Default 1000.
    pub max_tokens: u32,
    /// Token budget for retrieved context. Default 1500.
    pub context_token_budget: usize,
    /// Default 60000.
    pub oracle_timeout_ms: u64,
    /// Write each exchange back into memory. Default `false`.
    pub write_back: bool,
    /// Concurrent write-back inserts. Default 4.
    pub write_back_concurrency: usize,
    /// Write-backs allowed to wait for a slot; further ones are dropped.
    /// Default 256.
    pub write_back_backlog: usize,
}

impl GenerationSettings {
    /// Oracle call timeout.
    #[must_use]
    pub const fn oracle_timeout(&self) -> Duration {
        Duration::from_millis(self.oracle_timeout_ms)
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            default_model: None,
            temperature: 0.7,
            max_tokens: 1000,
            context_token_budget: 1500,
            oracle_timeout_ms: 60_000,
            write_back: false,
            write_back_concurrency: 4,
            write_back_backlog: 256,
        }
    }
}

/// Generation backends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleProvider {
    /// OpenAI chat completions.
    OpenAi,
    /// Local Ollama.
    #[default]
    Ollama,
}

/// `[oracle]`
#[derive(Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OracleSettings {
    /// Default `ollama`.
    pub provider: OracleProvider,
    /// Default `llama3`.
    pub model: String,
    /// Provider default when absent.
    pub base_url: Option<String>,
    /// Required for `openai`; `OPENAI_API_KEY` overrides it.
    pub api_key: Option<String>,
}

impl fmt::Debug for OracleSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OracleSettings")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            provider: OracleProvider::default(),
            model: "llama3".to_owned(),
            base_url: None,
            api_key: None,
        }
    }
}

/// Embedding backends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// OpenAI embeddings.
    OpenAi,
    /// Local Ollama.
    Ollama,
    /// In-process feature hashing; no network.
    #[default]
    Hash,
}

/// `[embedding]`
#[derive(Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmbeddingSettings {
    /// Default `hash`.
    pub provider: EmbeddingProvider,
    /// Remote model name. Default `text-embedding-3-small`.
    pub model: String,
    /// Provider default when absent.
    pub base_url: Option<String>,
    /// Falls back to `oracle.api_key`.
    pub api_key: Option<String>,
}

impl EmbeddingSettings {
    /// Key for the embedding provider, falling back to the oracle key.
    #[must_use]
    pub fn effective_api_key<'a>(&'a self, oracle: &'a OracleSettings) -> Option<&'a str> {
        self.api_key.as_deref().or(oracle.api_key.as_deref())
    }
}

impl fmt::Debug for EmbeddingSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingSettings")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            model: "text-embedding-3-small".to_owned(),
            base_url: None,
            api_key: None,
        }
    }
}

/// `[compaction]`
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompactionSettings {
    /// Seconds between passes; 0 disables. Default 300.
    pub interval_secs: u64,
}

impl CompactionSettings {
    /// Interval, or `None` when disabled.
    #[must_use]
    pub const fn interval(&self) -> Option<Duration> {
        if self.interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.interval_secs))
        }
    }
}

impl Default for CompactionSettings {
    fn default() -> Self {
        Self { interval_secs: 300 }
    }
}

impl ServiceConfig {
    /// Checks every range and cross-field constraint.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::Invalid`] found.
    pub fn validate(&self) -> ConfigResult<()> {
        self.server.bind_addr()?;
        if self.logging.filter.trim().is_empty() {
            return Err(ConfigError::invalid("logging.filter", "must not be empty"));
        }
        self.validate_store()?;
        self.validate_retrieval()?;
        self.validate_generation()?;
        self.validate_providers()
    }

    fn validate_store(&self) -> ConfigResult<()> {
        let store = &self.store;
        positive("store.dimensions", store.dimensions)?;
        positive("store.max_entries", store.max_entries)?;
        positive("store.max_text_length", store.max_text_length)?;
        positive("store.max_metadata_bytes", store.max_metadata_bytes)?;
        if !matches!(store.embedding_precision_bits, 8 | 16 | 32) {
            return Err(ConfigError::invalid(
                "store.embedding_precision_bits",
                format!("{} is not one of 8, 16, 32", store.embedding_precision_bits),
            ));
        }
        if store.ttl_secs == Some(0) {
            return Err(ConfigError::invalid("store.ttl_secs", "must be greater than zero"));
        }
        let decay = &store.time_decay;
        if !(decay.half_life_days.is_finite() && decay.half_life_days > 0.0) {
            return Err(ConfigError::invalid(
                "store.time_decay.half_life_days",
                "must be a positive number",
            ));
        }
        if !(decay.max_boost.is_finite() && decay.max_boost >= 1.0) {
            return Err(ConfigError::invalid(
                "store.time_decay.max_boost",
                "must be at least 1",
            ));
        }
        let eviction = &store.eviction;
        let weights = [eviction.recency_weight, eviction.importance_weight];
        if weights.iter().any(|w| !(w.is_finite() && *w >= 0.0)) || weights.iter().sum::<f64>() <= 0.0 {
            return Err(ConfigError::invalid(
                "store.eviction",
                "weights must be non-negative and not both zero",
            ));
        }
        Ok(())
    }

    fn validate_retrieval(&self) -> ConfigResult<()> {
        let retrieval = &self.retrieval;
        if !(-1.0..=1.0).contains(&retrieval.threshold) {
            return Err(ConfigError::invalid("retrieval.threshold", "must lie within [-1, 1]"));
        }
        if !(retrieval.diversity_factor.is_finite() && retrieval.diversity_factor >= 0.0) {
            return Err(ConfigError::invalid(
                "retrieval.diversity_factor",
                "must be a non-negative number",
            ));
        }
        positive("retrieval.embedding_timeout_ms", retrieval.embedding_timeout_ms)
    }

    fn validate_generation(&self) -> ConfigResult<()> {
        let generation = &self.generation;
        if !(0.0..=2.0).contains(&generation.temperature) {
            return Err(ConfigError::invalid("generation.temperature", "must lie within [0, 2]"));
        }
        positive("generation.max_tokens", generation.max_tokens)?;
        positive("generation.oracle_timeout_ms", generation.oracle_timeout_ms)?;
        positive("generation.write_back_concurrency", generation.write_back_concurrency)
    }

    fn validate_providers(&self) -> ConfigResult<()> {
        if self.oracle.model.trim().is_empty() {
            return Err(ConfigError::invalid("oracle.model", "must not be empty"));
        }
        if self.oracle.provider == OracleProvider::OpenAi && blank(self.oracle.api_key.as_deref()) {
            return Err(ConfigError::invalid(
                "oracle.api_key",
                "required for the openai provider (or set OPENAI_API_KEY)",
            ));
        }
        if self.embedding.provider == EmbeddingProvider::OpenAi
            && blank(self.embedding.effective_api_key(&self.oracle))
        {
            return Err(ConfigError::invalid(
                "embedding.api_key",
                "required for the openai provider (or set OPENAI_API_KEY)",
            ));
        }
        if self.embedding.provider != EmbeddingProvider::Hash && self.embedding.model.trim().is_empty() {
            return Err(ConfigError::invalid("embedding.model", "must not be empty"));
        }
        Ok(())
    }
}

fn positive<T>(field: &'static str, value: T) -> ConfigResult<()>
where
    T: PartialEq + Default,
{
    if value == T::default() {
        Err(ConfigError::invalid(field, "must be greater than zero"))
    } else {
        Ok(())
    }
}

fn blank(value: Option<&str>) -> bool {
    value.is_none_or(|value| value.trim().is_empty())
}
