//! Builds the service graph from validated configuration.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use tracing::info;

use recall_adapters::embeddings::{EmbeddingConfig, OllamaEmbedder, OpenAiEmbedder};
use recall_adapters::ollama::{OllamaAdapter, OllamaConfig};
use recall_adapters::openai::{OpenAiAdapter, OpenAiConfig};
use recall_adapters::traits::ModelAdapter;
use recall_config::{EmbeddingProvider, OracleProvider, ServiceConfig, Strategy};
use recall_context::{
    CompactionTask, CompositeSink, ContextRetriever, ContextStrategy, ExecutionSink,
    GenerationConfig, GenerationCoordinator, RetrievalConfig, SchedulerConfig,
    TracingExecutionSink, WriteBackScheduler,
};
use recall_memory::{
    EmbeddingFunction, EmbeddingPrecision, EmbeddingStore, EvictionWeights, HashEmbedder,
    StoreConfig, TimeDecay,
};
use recall_telemetry::ServiceMetrics;

use crate::metrics_sink::MetricsSink;
use crate::state::AppState;

/// Everything the binary owns: handler state plus background work that must
/// be drained at shutdown.
#[derive(Debug)]
pub struct Services {
    /// Handler state.
    pub state: AppState,
    /// Write-back scheduler shared with the coordinator.
    pub write_back: WriteBackScheduler,
    /// Periodic compaction, when enabled.
    pub compaction: Option<CompactionTask>,
}

impl Services {
    /// Stops background work, waiting at most `grace` for write-backs.
    pub async fn shutdown(self, grace: Duration) {
        if tokio::time::timeout(grace, self.write_back.shutdown())
            .await
            .is_err()
        {
            self.write_back.close();
            tracing::warn!(?grace, "write-back queue not drained before shutdown");
        }
        if let Some(compaction) = self.compaction {
            compaction.shutdown().await;
        }
    }
}

fn non_zero(field: &'static str, value: usize) -> Result<NonZeroUsize> {
    NonZeroUsize::new(value).with_context(|| format!("{field} must be greater than zero"))
}

/// Store configuration from `[store]`.
///
/// # Errors
///
/// Fails for values rejected by the store types.
pub fn store_config(config: &ServiceConfig) -> Result<StoreConfig> {
    let settings = &config.store;
    let mut store = StoreConfig::new(
        non_zero("store.dimensions", settings.dimensions)?,
        non_zero("store.max_entries", settings.max_entries)?,
    )
    .with_max_text_length(non_zero("store.max_text_length", settings.max_text_length)?)
    .with_max_metadata_bytes(non_zero("store.max_metadata_bytes", settings.max_metadata_bytes)?)
    .with_precision(EmbeddingPrecision::from_bits(settings.embedding_precision_bits)?)
    .with_time_decay(TimeDecay::new(
        settings.time_decay.half_life_days,
        settings.time_decay.max_boost,
    )?)
    .with_time_weighted_search(settings.time_decay.enabled)
    .with_eviction_weights(EvictionWeights::new(
        settings.eviction.recency_weight,
        settings.eviction.importance_weight,
    )?);
    if let Some(ttl) = settings.ttl() {
        store = store.with_ttl(ttl);
    }
    Ok(store)
}

fn embedder(config: &ServiceConfig) -> Result<Arc<dyn EmbeddingFunction>> {
    let dimensions = non_zero("store.dimensions", config.store.dimensions)?;
    let settings = &config.embedding;
    let remote = || {
        let mut remote = EmbeddingConfig::new(settings.model.clone(), dimensions)
            .with_timeout(config.retrieval.embedding_timeout());
        if let Some(base_url) = &settings.base_url {
            remote = remote.with_base_url(base_url.clone());
        }
        if let Some(key) = settings.effective_api_key(&config.oracle) {
            remote = remote.with_api_key(key);
        }
        remote
    };
    let embedder: Arc<dyn EmbeddingFunction> = match settings.provider {
        EmbeddingProvider::Hash => Arc::new(HashEmbedder::new(dimensions)),
        EmbeddingProvider::OpenAi => Arc::new(OpenAiEmbedder::new(remote())?),
        EmbeddingProvider::Ollama => Arc::new(OllamaEmbedder::new(remote())?),
    };
    Ok(embedder)
}

fn oracle(config: &ServiceConfig) -> Result<Arc<dyn ModelAdapter>> {
    let settings = &config.oracle;
    let timeout = config.generation.oracle_timeout();
    let adapter: Arc<dyn ModelAdapter> = match settings.provider {
        OracleProvider::OpenAi => {
            let mut openai = OpenAiConfig::new(settings.model.clone()).with_timeout(timeout);
            if let Some(base_url) = &settings.base_url {
                openai = openai.with_base_url(base_url)?;
            }
            if let Some(key) = &settings.api_key {
                openai = openai.with_api_key(key.clone());
            }
            Arc::new(OpenAiAdapter::new(openai)?)
        }
        OracleProvider::Ollama => {
            let mut ollama = OllamaConfig::new(settings.model.clone()).with_timeout(timeout);
            if let Some(base_url) = &settings.base_url {
                ollama = ollama.with_base_url(base_url)?;
            }
            Arc::new(OllamaAdapter::new(ollama)?)
        }
    };
    Ok(adapter)
}

/// Retrieval defaults from `[retrieval]`.
#[must_use]
pub fn retrieval_config(config: &ServiceConfig) -> RetrievalConfig {
    let settings = &config.retrieval;
    let strategy = match settings.strategy {
        Strategy::Standard => ContextStrategy::Standard,
        Strategy::Smart => ContextStrategy::Smart,
        Strategy::Analytical => ContextStrategy::Analytical,
    };
    RetrievalConfig::default()
        .with_limit(settings.limit)
        .with_threshold(settings.threshold)
        .with_diversity_factor(settings.diversity_factor)
        .with_strategy(strategy)
        .with_embedding_timeout(settings.embedding_timeout())
}

/// Generation defaults from `[generation]`.
#[must_use]
pub fn generation_config(config: &ServiceConfig) -> GenerationConfig {
    let settings = &config.generation;
    let generation = GenerationConfig::default()
        .with_temperature(settings.temperature)
        .with_max_tokens(settings.max_tokens)
        .with_context_token_budget(settings.context_token_budget)
        .with_oracle_timeout(settings.oracle_timeout())
        .with_write_back(settings.write_back);
    match &settings.default_model {
        Some(model) => generation.with_default_model(model.clone()),
        None => generation,
    }
}

/// Builds the service from validated configuration with the configured
/// oracle. Must be called inside a Tokio runtime when compaction is enabled.
///
/// # Errors
///
/// Fails when a provider cannot be constructed or a setting is rejected by
/// the library types.
pub fn build(config: &ServiceConfig) -> Result<Services> {
    let adapter = oracle(config).context("failed to construct generation oracle")?;
    build_with_oracle(config, adapter)
}

/// [`build`] with an explicit oracle, used by tests and embedders of the
/// library.
///
/// # Errors
///
/// See [`build`].
pub fn build_with_oracle(config: &ServiceConfig, adapter: Arc<dyn ModelAdapter>) -> Result<Services> {
    let embedder = embedder(config).context("failed to construct embedding function")?;
    let store = Arc::new(EmbeddingStore::new(store_config(config)?).with_embedder(Arc::clone(&embedder)));
    let retriever = ContextRetriever::new(Arc::clone(&store), embedder, retrieval_config(config))?;

    let metrics = ServiceMetrics::new();
    let sink = CompositeSink::new([
        Arc::new(TracingExecutionSink) as Arc<dyn ExecutionSink>,
        Arc::new(MetricsSink::new(Arc::clone(&metrics))) as Arc<dyn ExecutionSink>,
    ]);
    let write_back = WriteBackScheduler::new(
        SchedulerConfig::new(non_zero(
            "generation.write_back_concurrency",
            config.generation.write_back_concurrency,
        )?)
        .with_max_backlog(config.generation.write_back_backlog),
    );
    let coordinator = GenerationCoordinator::new(retriever, adapter, generation_config(config))?
        .with_sink(Arc::new(sink))
        .with_write_back(write_back.clone());

    let compaction = config
        .compaction
        .interval()
        .map(|interval| CompactionTask::spawn(Arc::clone(&store), interval));

    info!(
        dimensions = config.store.dimensions,
        max_entries = config.store.max_entries,
        oracle = ?config.oracle.provider,
        embedding = ?config.embedding.provider,
        compaction = compaction.is_some(),
        "recall service assembled"
    );

    Ok(Services {
        state: AppState {
            coordinator: Arc::new(coordinator),
            store,
            metrics,
        },
        write_back,
        compaction,
    })
}
