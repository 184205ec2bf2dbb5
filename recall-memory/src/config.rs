//! Configuration for the embedding store.

use std::num::NonZeroUsize;
use std::time::Duration;

use crate::embeddings::EmbeddingPrecision;
use crate::{MemoryError, MemoryResult};

const DEFAULT_DIMENSIONS: usize = 1536;
const DEFAULT_MAX_ENTRIES: usize = 1000;
const DEFAULT_MAX_TEXT_LENGTH: usize = 1000;
const DEFAULT_MAX_METADATA_BYTES: usize = 2048;

/// Exponential time-decay curve shared by search scoring and eviction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeDecay {
    half_life_days: f64,
    max_boost: f64,
}

impl TimeDecay {
    /// Creates a decay curve.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] when the half-life is not a
    /// positive finite number or `max_boost` is below `1.0`.
    pub fn new(half_life_days: f64, max_boost: f64) -> MemoryResult<Self> {
        if !(half_life_days.is_finite() && half_life_days > 0.0) {
            return Err(MemoryError::InvalidConfig(
                "time decay half-life must be positive",
            ));
        }
        if !(max_boost.is_finite() && max_boost >= 1.0) {
            return Err(MemoryError::InvalidConfig(
                "time decay max boost must be at least 1.0",
            ));
        }
        Ok(Self {
            half_life_days,
            max_boost,
        })
    }

    /// Half-life of the curve in days.
    #[must_use]
    pub const fn half_life_days(self) -> f64 {
        self.half_life_days
    }

    /// Ratio between the weight of a brand-new entry and an arbitrarily old one.
    #[must_use]
    pub const fn max_boost(self) -> f64 {
        self.max_boost
    }
}

impl Default for TimeDecay {
    fn default() -> Self {
        Self {
            half_life_days: 30.0,
            max_boost: 1.5,
        }
    }
}

/// Relative weights used to rank eviction candidates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvictionWeights {
    recency: f64,
    importance: f64,
}

impl EvictionWeights {
    /// Creates a weight pair.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] when either weight is negative or
    /// non-finite, or both are zero.
    pub fn new(recency: f64, importance: f64) -> MemoryResult<Self> {
        let valid = |w: f64| w.is_finite() && w >= 0.0;
        if !valid(recency) || !valid(importance) {
            return Err(MemoryError::InvalidConfig(
                "eviction weights must be non-negative",
            ));
        }
        if recency == 0.0 && importance == 0.0 {
            return Err(MemoryError::InvalidConfig(
                "at least one eviction weight must be positive",
            ));
        }
        Ok(Self {
            recency,
            importance,
        })
    }

    /// Weight applied to the recency component.
    #[must_use]
    pub const fn recency(self) -> f64 {
        self.recency
    }

    /// Weight applied to the importance component.
    #[must_use]
    pub const fn importance(self) -> f64 {
        self.importance
    }
}

impl Default for EvictionWeights {
    fn default() -> Self {
        Self {
            recency: 0.5,
            importance: 0.5,
        }
    }
}

/// Configuration for an [`EmbeddingStore`](crate::EmbeddingStore).
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    dimensions: NonZeroUsize,
    max_entries: NonZeroUsize,
    max_text_length: NonZeroUsize,
    max_metadata_bytes: NonZeroUsize,
    precision: EmbeddingPrecision,
    ttl: Option<Duration>,
    time_decay: TimeDecay,
    time_weighted_search: bool,
    eviction: EvictionWeights,
}

impl StoreConfig {
    /// Creates a configuration with the given dimensionality and capacity.
    #[must_use]
    pub fn new(dimensions: NonZeroUsize, max_entries: NonZeroUsize) -> Self {
        Self {
            dimensions,
            max_entries,
            ..Self::default()
        }
    }

    /// Sets the maximum text length in characters retained per entry.
    #[must_use]
    pub fn with_max_text_length(mut self, max_text_length: NonZeroUsize) -> Self {
        self.max_text_length = max_text_length;
        self
    }

    /// Sets the serialized metadata budget in bytes.
    #[must_use]
    pub fn with_max_metadata_bytes(mut self, max_metadata_bytes: NonZeroUsize) -> Self {
        self.max_metadata_bytes = max_metadata_bytes;
        self
    }

    /// Sets the precision used for stored embeddings.
    #[must_use]
    pub fn with_precision(mut self, precision: EmbeddingPrecision) -> Self {
        self.precision = precision;
        self
    }

    /// Enables TTL expiry; entries older than `ttl` become eligible for removal.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Replaces the decay curve.
    #[must_use]
    pub fn with_time_decay(mut self, time_decay: TimeDecay) -> Self {
        self.time_decay = time_decay;
        self
    }

    /// Toggles time weighting of search scores.
    #[must_use]
    pub fn with_time_weighted_search(mut self, enabled: bool) -> Self {
        self.time_weighted_search = enabled;
        self
    }

    /// Replaces the eviction weights.
    #[must_use]
    pub fn with_eviction_weights(mut self, eviction: EvictionWeights) -> Self {
        self.eviction = eviction;
        self
    }

    /// Dimensionality every stored embedding must have.
    #[must_use]
    pub const fn dimensions(&self) -> NonZeroUsize {
        self.dimensions
    }

    /// Maximum number of entries held at any time.
    #[must_use]
    pub const fn max_entries(&self) -> NonZeroUsize {
        self.max_entries
    }

    /// Maximum text length in characters.
    #[must_use]
    pub const fn max_text_length(&self) -> NonZeroUsize {
        self.max_text_length
    }

    /// Serialized metadata budget in bytes.
    #[must_use]
    pub const fn max_metadata_bytes(&self) -> NonZeroUsize {
        self.max_metadata_bytes
    }

    /// Precision used for stored embeddings.
    #[must_use]
    pub const fn precision(&self) -> EmbeddingPrecision {
        self.precision
    }

    /// TTL applied to new entries, if enabled.
    #[must_use]
    pub const fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Decay curve.
    #[must_use]
    pub const fn time_decay(&self) -> TimeDecay {
        self.time_decay
    }

    /// Whether search scores are time weighted.
    #[must_use]
    pub const fn time_weighted_search(&self) -> bool {
        self.time_weighted_search
    }

    /// Eviction weights.
    #[must_use]
    pub const fn eviction(&self) -> EvictionWeights {
        self.eviction
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dimensions: NonZeroUsize::new(DEFAULT_DIMENSIONS).expect("non-zero"),
            max_entries: NonZeroUsize::new(DEFAULT_MAX_ENTRIES).expect("non-zero"),
            max_text_length: NonZeroUsize::new(DEFAULT_MAX_TEXT_LENGTH).expect("non-zero"),
            max_metadata_bytes: NonZeroUsize::new(DEFAULT_MAX_METADATA_BYTES).expect("non-zero"),
            precision: EmbeddingPrecision::Full,
            ttl: None,
            time_decay: TimeDecay::default(),
            time_weighted_search: true,
            eviction: EvictionWeights::default(),
        }
    }
}
