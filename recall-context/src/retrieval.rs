//! Query-time retrieval: embed, plan, search.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use recall_memory::{
    EmbeddingFunction, EmbeddingStore, EmbeddingVector, MemoryEntry, MemoryError, NewMemory,
    RetrievalResult, SearchOptions,
};

use crate::{ContextError, ContextResult};

const SHORT_QUERY_WORDS: usize = 4;
const LONG_QUERY_WORDS: usize = 20;
const ANALYTICAL_MIN_THRESHOLD: f64 = 0.8;
const ANALYTICAL_MAX_DIVERSITY: f64 = 0.1;
const ANALYTICAL_MIN_CONFIDENCE: f64 = 0.6;

/// Context-integration policy applied on top of the base search parameters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextStrategy {
    /// Use the parameters as given.
    Standard,
    /// Loosen short, vague queries and tighten specific ones.
    #[default]
    Smart,
    /// Tightly relevant, high-confidence results with little diversification.
    Analytical,
}

impl fmt::Display for ContextStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Standard => "standard",
            Self::Smart => "smart",
            Self::Analytical => "analytical",
        })
    }
}

/// Service-wide retrieval defaults.
#[derive(Clone, Debug, PartialEq)]
pub struct RetrievalConfig {
    limit: usize,
    threshold: f64,
    diversity_factor: f64,
    strategy: ContextStrategy,
    embedding_timeout: Duration,
}

impl RetrievalConfig {
    /// Sets the default result limit.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Sets the default minimum score.
    #[must_use]
    pub const fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Sets the default diversity factor.
    #[must_use]
    pub const fn with_diversity_factor(mut self, diversity_factor: f64) -> Self {
        self.diversity_factor = diversity_factor;
        self
    }

    /// Sets the default strategy.
    #[must_use]
    pub const fn with_strategy(mut self, strategy: ContextStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Bounds every call to the embedding function.
    #[must_use]
    pub const fn with_embedding_timeout(mut self, timeout: Duration) -> Self {
        self.embedding_timeout = timeout;
        self
    }

    /// Default result limit.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Default minimum score.
    #[must_use]
    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Default diversity factor.
    #[must_use]
    pub const fn diversity_factor(&self) -> f64 {
        self.diversity_factor
    }

    /// Default strategy.
    #[must_use]
    pub const fn strategy(&self) -> ContextStrategy {
        self.strategy
    }

    /// Embedding call timeout.
    #[must_use]
    pub const fn embedding_timeout(&self) -> Duration {
        self.embedding_timeout
    }

    /// Checks ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::InvalidArgument`] for a threshold outside
    /// `[-1, 1]`, a negative diversity factor or a zero timeout.
    pub fn validate(&self) -> ContextResult<()> {
        check_threshold(self.threshold)?;
        check_diversity(self.diversity_factor)?;
        if self.embedding_timeout.is_zero() {
            return Err(ContextError::invalid_argument(
                "embedding timeout must be greater than zero",
            ));
        }
        Ok(())
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            limit: 5,
            threshold: 0.7,
            diversity_factor: 0.5,
            strategy: ContextStrategy::default(),
            embedding_timeout: Duration::from_secs(10),
        }
    }
}

/// Per-request retrieval overrides. Absent fields fall back to
/// [`RetrievalConfig`].
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetrievalOptions {
    /// `false` bypasses retrieval entirely.
    #[serde(alias = "useVectorMemory")]
    pub use_vector_memory: bool,
    /// Maximum number of results.
    pub limit: Option<usize>,
    /// Minimum score.
    pub threshold: Option<f64>,
    /// Diversity penalty weight.
    #[serde(alias = "diversityFactor")]
    pub diversity_factor: Option<f64>,
    /// Strategy override.
    #[serde(alias = "contextStrategy")]
    pub strategy: Option<ContextStrategy>,
    /// Tags every result must carry.
    #[serde(alias = "requiredTags")]
    pub required_tags: Vec<String>,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            use_vector_memory: true,
            limit: None,
            threshold: None,
            diversity_factor: None,
            strategy: None,
            required_tags: Vec::new(),
        }
    }
}

impl RetrievalOptions {
    /// Options that skip retrieval.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            use_vector_memory: false,
            ..Self::default()
        }
    }

    /// Checks explicit overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::InvalidArgument`] for an out-of-range
    /// threshold or diversity factor.
    pub fn validate(&self) -> ContextResult<()> {
        if let Some(threshold) = self.threshold {
            check_threshold(threshold)?;
        }
        if let Some(diversity) = self.diversity_factor {
            check_diversity(diversity)?;
        }
        Ok(())
    }
}

fn check_threshold(threshold: f64) -> ContextResult<()> {
    if (-1.0..=1.0).contains(&threshold) {
        Ok(())
    } else {
        Err(ContextError::invalid_argument(
            "threshold must lie within [-1, 1]",
        ))
    }
}

fn check_diversity(diversity: f64) -> ContextResult<()> {
    if diversity.is_finite() && diversity >= 0.0 {
        Ok(())
    } else {
        Err(ContextError::invalid_argument(
            "diversity_factor must be a non-negative number",
        ))
    }
}

/// Effective search parameters for one query.
#[derive(Clone, Debug, PartialEq)]
pub struct RetrievalPlan {
    /// Strategy that produced the plan.
    pub strategy: ContextStrategy,
    /// Maximum number of results.
    pub limit: usize,
    /// Minimum score.
    pub threshold: f64,
    /// Diversity penalty weight.
    pub diversity_factor: f64,
    /// Confidence floor, set by the analytical strategy.
    pub min_confidence: Option<f64>,
    /// Tags every result must carry.
    pub required_tags: Vec<String>,
}

impl RetrievalPlan {
    /// Converts the plan into store search options.
    #[must_use]
    pub fn search_options(&self) -> SearchOptions {
        let options = SearchOptions::new(self.limit)
            .with_threshold(self.threshold)
            .with_diversity_factor(self.diversity_factor)
            .with_required_tags(self.required_tags.iter().cloned());
        match self.min_confidence {
            Some(min) => options.with_min_confidence(min),
            None => options,
        }
    }
}

/// Resolves overrides against defaults and applies the strategy heuristics.
///
/// Smart: a query with at least twenty words, a digit or a double quote is
/// treated as specific (threshold +0.05, diversity at most 0.2); otherwise a
/// query of at most four words is treated as vague (threshold -0.1, diversity
/// at least 0.5). Analytical: threshold at least 0.8, diversity at most 0.1,
/// confidence at least 0.6.
#[must_use]
pub fn plan(query: &str, config: &RetrievalConfig, options: &RetrievalOptions) -> RetrievalPlan {
    let strategy = options.strategy.unwrap_or(config.strategy);
    let mut threshold = options.threshold.unwrap_or(config.threshold);
    let mut diversity = options.diversity_factor.unwrap_or(config.diversity_factor);
    let mut min_confidence = None;

    match strategy {
        ContextStrategy::Standard => {}
        ContextStrategy::Smart => {
            let words = query.split_whitespace().count();
            let specific = words >= LONG_QUERY_WORDS
                || query.chars().any(|c| c.is_ascii_digit() || c == '"');
            if specific {
                threshold += 0.05;
                diversity = diversity.min(0.2);
            } else if words <= SHORT_QUERY_WORDS {
                threshold -= 0.1;
                diversity = diversity.max(0.5);
            }
        }
        ContextStrategy::Analytical => {
            threshold = threshold.max(ANALYTICAL_MIN_THRESHOLD);
            diversity = diversity.min(ANALYTICAL_MAX_DIVERSITY);
            min_confidence = Some(ANALYTICAL_MIN_CONFIDENCE);
        }
    }

    RetrievalPlan {
        strategy,
        limit: options.limit.unwrap_or(config.limit),
        threshold: threshold.clamp(-1.0, 1.0),
        diversity_factor: diversity,
        min_confidence,
        required_tags: options.required_tags.clone(),
    }
}

/// Results of one retrieval together with the plan that produced them.
#[derive(Clone, Debug)]
pub struct RetrievedContext {
    /// Effective parameters.
    pub plan: RetrievalPlan,
    /// Ranked results.
    pub results: Vec<RetrievalResult>,
}

/// Embeds queries and searches the shared store. Never mutates the store
/// except through [`ContextRetriever::remember`].
#[derive(Clone)]
pub struct ContextRetriever {
    store: Arc<EmbeddingStore>,
    embedder: Arc<dyn EmbeddingFunction>,
    config: RetrievalConfig,
}

impl fmt::Debug for ContextRetriever {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextRetriever")
            .field("embedder", &self.embedder.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ContextRetriever {
    /// Creates a retriever.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::InvalidArgument`] for an invalid configuration
    /// and [`MemoryError::InvalidConfig`] when the embedding function's width
    /// differs from the store's.
    pub fn new(
        store: Arc<EmbeddingStore>,
        embedder: Arc<dyn EmbeddingFunction>,
        config: RetrievalConfig,
    ) -> ContextResult<Self> {
        config.validate()?;
        if embedder.dimensions() != store.config().dimensions().get() {
            return Err(MemoryError::InvalidConfig(
                "embedding function width differs from the store dimensions",
            )
            .into());
        }
        Ok(Self {
            store,
            embedder,
            config,
        })
    }

    /// Shared store.
    #[must_use]
    pub fn store(&self) -> &Arc<EmbeddingStore> {
        &self.store
    }

    /// Retrieval defaults.
    #[must_use]
    pub const fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Ranked context for `query`; empty when retrieval is disabled.
    ///
    /// # Errors
    ///
    /// See [`Self::retrieve`].
    pub async fn get_context(
        &self,
        query: &str,
        options: &RetrievalOptions,
    ) -> ContextResult<Vec<RetrievalResult>> {
        Ok(self.retrieve(query, options).await?.results)
    }

    /// Plans, embeds and searches.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::InvalidArgument`] for an empty query or bad
    /// overrides, [`ContextError::EmbeddingFailed`] when the embedding
    /// function fails, times out or returns a vector of the wrong width, and
    /// [`ContextError::Memory`] when the search itself fails.
    pub async fn retrieve(
        &self,
        query: &str,
        options: &RetrievalOptions,
    ) -> ContextResult<RetrievedContext> {
        if query.trim().is_empty() {
            return Err(ContextError::invalid_argument("query must not be empty"));
        }
        options.validate()?;
        let plan = plan(query, &self.config, options);
        if !options.use_vector_memory {
            return Ok(RetrievedContext {
                plan,
                results: Vec::new(),
            });
        }

        let embedding = self.embed(query).await?;
        let results = self.store.search(&embedding, &plan.search_options()).await?;
        debug!(
            strategy = %plan.strategy,
            threshold = plan.threshold,
            diversity = plan.diversity_factor,
            results = results.len(),
            "context retrieved"
        );
        Ok(RetrievedContext { plan, results })
    }

    /// Embeds `text` and stores it with `metadata`.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::EmbeddingFailed`] when embedding fails and
    /// [`ContextError::Memory`] when the store rejects the entry.
    pub async fn remember(
        &self,
        text: &str,
        metadata: Map<String, Value>,
    ) -> ContextResult<Arc<MemoryEntry>> {
        let embedding = self.embed(text).await?;
        let entry = self
            .store
            .insert(NewMemory::new(text, embedding).with_metadata(metadata))
            .await?;
        Ok(entry)
    }

    async fn embed(&self, text: &str) -> ContextResult<EmbeddingVector> {
        let timeout = self.config.embedding_timeout;
        let embedding = tokio::time::timeout(timeout, self.embedder.embed(text))
            .await
            .map_err(|_| ContextError::EmbeddingFailed {
                reason: format!("{} timed out after {timeout:?}", self.embedder.name()),
            })?
            .map_err(|err| ContextError::EmbeddingFailed {
                reason: err.to_string(),
            })?;

        let expected = self.store.config().dimensions().get();
        if embedding.len() != expected {
            return Err(ContextError::EmbeddingFailed {
                reason: format!(
                    "{} returned {} components, expected {expected}",
                    self.embedder.name(),
                    embedding.len()
                ),
            });
        }
        Ok(embedding)
    }
}
