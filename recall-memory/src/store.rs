//! Capacity-bounded embedding store with time-weighted similarity search.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info};

use recall_primitives::MemoryId;

use crate::config::StoreConfig;
use crate::embedder::EmbeddingFunction;
use crate::embeddings::{EmbeddingVector, StoredEmbedding};
use crate::entry::{MemoryEntry, NewMemory, validate_metadata};
use crate::optimizer::{OptimizationReport, compress_metadata, optimize_text};
use crate::scoring::{eviction_order, select_diverse, time_weighted};
use crate::{MemoryError, MemoryResult};

/// Parameters for [`EmbeddingStore::search`].
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    limit: usize,
    threshold: f64,
    diversity_factor: f64,
    required_tags: Vec<String>,
    min_confidence: Option<f64>,
}

impl SearchOptions {
    /// Returns at most `limit` results with no threshold and no diversification.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            threshold: f64::NEG_INFINITY,
            diversity_factor: 0.0,
            required_tags: Vec::new(),
            min_confidence: None,
        }
    }

    /// Discards results scoring below `threshold`.
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Penalises candidates similar to already selected results. `0` keeps
    /// pure score order.
    #[must_use]
    pub fn with_diversity_factor(mut self, diversity_factor: f64) -> Self {
        self.diversity_factor = diversity_factor;
        self
    }

    /// Restricts results to entries carrying every tag.
    #[must_use]
    pub fn with_required_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Skips entries whose `confidence` metadata is below `min_confidence`.
    /// Entries without a confidence value are kept.
    #[must_use]
    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = Some(min_confidence);
        self
    }

    /// Maximum number of results.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Minimum score.
    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Diversity penalty weight.
    #[must_use]
    pub fn diversity_factor(&self) -> f64 {
        self.diversity_factor
    }

    /// Tags every result must carry.
    #[must_use]
    pub fn required_tags(&self) -> &[String] {
        &self.required_tags
    }

    /// Minimum confidence, if any.
    #[must_use]
    pub fn min_confidence(&self) -> Option<f64> {
        self.min_confidence
    }

    fn admits(&self, entry: &MemoryEntry, now: DateTime<Utc>) -> bool {
        !entry.is_expired(now)
            && entry.has_tags(&self.required_tags)
            && self.min_confidence.is_none_or(|min| {
                entry.confidence().is_none_or(|confidence| confidence.get() >= min)
            })
    }
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self::new(5)
    }
}

/// One scored search hit.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    /// Matched entry.
    pub entry: Arc<MemoryEntry>,
    /// Similarity after time weighting; what thresholds and ordering use.
    pub score: f64,
    /// Raw cosine similarity.
    pub similarity: f64,
}

/// Snapshot of store utilisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    /// Entries currently held.
    pub entries: usize,
    /// Maximum entries permitted.
    pub capacity: usize,
    /// Embedding dimensionality.
    pub dimensions: usize,
    /// Bits per stored embedding component.
    pub precision_bits: u8,
    /// Estimated bytes held by text, metadata and embeddings.
    pub estimated_bytes: usize,
    /// Lifetime count of capacity evictions.
    pub evictions: u64,
    /// Lifetime count of entries removed after their TTL elapsed.
    pub expirations: u64,
}

#[derive(Debug, Default)]
struct StoreInner {
    entries: HashMap<MemoryId, Arc<MemoryEntry>>,
    next_sequence: u64,
    evictions: u64,
    expirations: u64,
}

impl StoreInner {
    fn estimated_bytes(&self) -> usize {
        self.entries.values().map(|entry| entry.estimated_bytes()).sum()
    }

    fn evict_one(&mut self, now: DateTime<Utc>, config: &StoreConfig) -> Option<Arc<MemoryEntry>> {
        let victim = self
            .entries
            .values()
            .min_by(|lhs, rhs| eviction_order(lhs, rhs, now, config))
            .map(|entry| entry.id())?;
        let evicted = self.entries.remove(&victim)?;
        if evicted.is_expired(now) {
            self.expirations += 1;
        } else {
            self.evictions += 1;
        }
        debug!(entry_id = %victim, sequence = evicted.sequence(), "evicted memory entry");
        Some(evicted)
    }

    fn remove_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - self.entries.len();
        self.expirations += removed as u64;
        removed
    }
}

/// In-process embedding store.
///
/// Reads share a `tokio::sync::RwLock`; insertion, eviction and compaction
/// all take the write half, so an insert and the eviction it triggers are
/// observed atomically.
pub struct EmbeddingStore {
    config: StoreConfig,
    inner: RwLock<StoreInner>,
    embedder: Option<Arc<dyn EmbeddingFunction>>,
}

impl std::fmt::Debug for EmbeddingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingStore")
            .field("config", &self.config)
            .field("embedder", &self.embedder.as_ref().map(|e| e.name().to_owned()))
            .finish_non_exhaustive()
    }
}

impl EmbeddingStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(StoreInner::default()),
            embedder: None,
        }
    }

    /// Attaches the embedding function used by [`Self::insert_text`].
    #[must_use]
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingFunction>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Inserts a memory with a precomputed embedding.
    ///
    /// Text and metadata are optimised to the configured bounds first. When
    /// the store is full the least valuable existing entry is evicted in the
    /// same critical section.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::DimensionMismatch`] for a wrongly sized
    /// embedding and [`MemoryError::InvalidRecord`] for empty text or
    /// out-of-range metadata scores.
    pub async fn insert(&self, memory: NewMemory) -> MemoryResult<Arc<MemoryEntry>> {
        self.insert_at(memory, Utc::now()).await
    }

    /// [`Self::insert`] with an explicit clock reading.
    ///
    /// # Errors
    ///
    /// See [`Self::insert`].
    pub async fn insert_at(
        &self,
        memory: NewMemory,
        now: DateTime<Utc>,
    ) -> MemoryResult<Arc<MemoryEntry>> {
        self.check_dimensions(memory.embedding.len())?;
        if memory.text.trim().is_empty() {
            return Err(MemoryError::InvalidRecord("memory text must not be empty"));
        }
        validate_metadata(&memory.metadata)?;

        let text = optimize_text(&memory.text, self.config.max_text_length().get());
        let metadata = compress_metadata(&memory.metadata, self.config.max_metadata_bytes().get());
        let embedding = StoredEmbedding::encode(&memory.embedding, self.config.precision());
        let expires_at = self
            .config
            .ttl()
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .and_then(|ttl| now.checked_add_signed(ttl));

        let mut guard = self.inner.write().await;
        while guard.entries.len() >= self.config.max_entries().get() {
            if guard.evict_one(now, &self.config).is_none() {
                break;
            }
        }
        let sequence = guard.next_sequence;
        guard.next_sequence += 1;
        let entry = Arc::new(MemoryEntry::new(
            MemoryId::random(),
            text,
            embedding,
            metadata,
            now,
            expires_at,
            sequence,
        ));
        guard.entries.insert(entry.id(), Arc::clone(&entry));
        debug!(entry_id = %entry.id(), entries = guard.entries.len(), "inserted memory entry");
        Ok(entry)
    }

    /// Embeds `text` with the attached embedding function and inserts it.
    ///
    /// The embedding call runs before the write lock is taken.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] when no embedding function is
    /// attached, [`MemoryError::Embedding`] when embedding fails, and the
    /// errors of [`Self::insert`].
    pub async fn insert_text(
        &self,
        text: impl Into<String>,
        metadata: Map<String, Value>,
    ) -> MemoryResult<Arc<MemoryEntry>> {
        let embedder = self.embedder.as_ref().ok_or(MemoryError::InvalidConfig(
            "no embedding function attached to the store",
        ))?;
        let text = text.into();
        let embedding = embedder.embed(&text).await?;
        self.insert(NewMemory::new(text, embedding).with_metadata(metadata))
            .await
    }

    /// Similarity search at the current time.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::DimensionMismatch`] when the query width differs
    /// from the store's, and [`MemoryError::InvalidConfig`] for a negative or
    /// non-finite diversity factor.
    pub async fn search(
        &self,
        query: &EmbeddingVector,
        options: &SearchOptions,
    ) -> MemoryResult<Vec<RetrievalResult>> {
        self.search_at(query, options, Utc::now()).await
    }

    /// [`Self::search`] with an explicit clock reading.
    ///
    /// # Errors
    ///
    /// See [`Self::search`].
    pub async fn search_at(
        &self,
        query: &EmbeddingVector,
        options: &SearchOptions,
        now: DateTime<Utc>,
    ) -> MemoryResult<Vec<RetrievalResult>> {
        self.check_dimensions(query.len())?;
        let diversity = options.diversity_factor();
        if !(diversity.is_finite() && diversity >= 0.0) {
            return Err(MemoryError::InvalidConfig(
                "diversity factor must be a non-negative number",
            ));
        }
        if options.limit() == 0 {
            return Ok(Vec::new());
        }

        let query_norm = query.magnitude();
        let mut candidates: Vec<(RetrievalResult, f64)> = {
            let guard = self.inner.read().await;
            guard
                .entries
                .values()
                .filter(|entry| options.admits(entry, now))
                .filter_map(|entry| {
                    let similarity = f64::from(entry.embedding().cosine(query.as_slice(), query_norm));
                    let score = if self.config.time_weighted_search() {
                        time_weighted(similarity, entry.age_days(now), self.config.time_decay())
                    } else {
                        similarity
                    };
                    (score >= options.threshold()).then(|| {
                        let result = RetrievalResult {
                            entry: Arc::clone(entry),
                            score,
                            similarity,
                        };
                        (result, score)
                    })
                })
                .collect()
        };

        candidates.sort_by(|(lhs, _), (rhs, _)| {
            rhs.score
                .total_cmp(&lhs.score)
                .then_with(|| lhs.entry.sequence().cmp(&rhs.entry.sequence()))
        });
        let selected = select_diverse(candidates, options.limit(), diversity, |lhs, rhs| {
            f64::from(lhs.entry.embedding().similarity(rhs.entry.embedding()))
        });
        Ok(selected.into_iter().map(|(result, _)| result).collect())
    }

    /// Evicts entries until the store is within capacity. Returns the count
    /// removed; zero whenever every insert went through [`Self::insert`].
    pub async fn evict_if_over_capacity(&self) -> usize {
        let now = Utc::now();
        let mut guard = self.inner.write().await;
        let mut removed = 0;
        while guard.entries.len() > self.config.max_entries().get()
            && guard.evict_one(now, &self.config).is_some()
        {
            removed += 1;
        }
        removed
    }

    /// Looks up an entry by id.
    pub async fn get(&self, id: MemoryId) -> Option<Arc<MemoryEntry>> {
        self.inner.read().await.entries.get(&id).cloned()
    }

    /// Removes an entry by id.
    pub async fn remove(&self, id: MemoryId) -> Option<Arc<MemoryEntry>> {
        self.inner.write().await.entries.remove(&id)
    }

    /// Number of entries held.
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    /// Returns `true` when the store holds nothing.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Removes every entry. Lifetime counters are kept.
    pub async fn clear(&self) {
        self.inner.write().await.entries.clear();
    }

    /// Utilisation snapshot.
    pub async fn stats(&self) -> MemoryStats {
        let guard = self.inner.read().await;
        MemoryStats {
            entries: guard.entries.len(),
            capacity: self.config.max_entries().get(),
            dimensions: self.config.dimensions().get(),
            precision_bits: self.config.precision().bits(),
            estimated_bytes: guard.estimated_bytes(),
            evictions: guard.evictions,
            expirations: guard.expirations,
        }
    }

    /// Store-wide compaction pass at the current time.
    ///
    /// Removes expired entries, evicts down to capacity, then re-applies the
    /// text, metadata and precision bounds to every remaining entry. Running
    /// it twice with no writes in between changes nothing the second time.
    pub async fn optimize_memory(&self) -> OptimizationReport {
        self.optimize_memory_at(Utc::now()).await
    }

    /// [`Self::optimize_memory`] with an explicit clock reading.
    pub async fn optimize_memory_at(&self, now: DateTime<Utc>) -> OptimizationReport {
        let max_text = self.config.max_text_length().get();
        let max_metadata = self.config.max_metadata_bytes().get();
        let precision = self.config.precision();

        let mut guard = self.inner.write().await;
        let mut report = OptimizationReport {
            entries_before: guard.entries.len(),
            bytes_before: guard.estimated_bytes(),
            ..OptimizationReport::default()
        };

        report.expired_removed = guard.remove_expired(now);
        while guard.entries.len() > self.config.max_entries().get()
            && guard.evict_one(now, &self.config).is_some()
        {
            report.evicted += 1;
        }

        for slot in guard.entries.values_mut() {
            let mut updated: Option<MemoryEntry> = None;

            let text = optimize_text(slot.text(), max_text);
            if text != slot.text() {
                updated = Some(slot.with_text(text));
                report.texts_truncated += 1;
            }
            let metadata = compress_metadata(slot.metadata(), max_metadata);
            if &metadata != slot.metadata() {
                updated = Some(updated.as_ref().unwrap_or(&**slot).with_metadata(metadata));
                report.metadata_compacted += 1;
            }
            if slot.embedding().precision() != precision {
                let embedding = slot.embedding().with_precision(precision);
                updated = Some(updated.as_ref().unwrap_or(&**slot).with_embedding(embedding));
                report.embeddings_requantized += 1;
            }
            if let Some(entry) = updated {
                *slot = Arc::new(entry);
            }
        }

        report.entries_after = guard.entries.len();
        report.bytes_after = guard.estimated_bytes();
        report.memory_reduction = report.bytes_before.saturating_sub(report.bytes_after);
        drop(guard);

        if report.is_noop() {
            debug!("memory optimisation found nothing to do");
        } else {
            info!(
                entries_before = report.entries_before,
                entries_after = report.entries_after,
                memory_reduction = report.memory_reduction,
                "memory optimised"
            );
        }
        report
    }

    fn check_dimensions(&self, actual: usize) -> MemoryResult<()> {
        let expected = self.config.dimensions().get();
        if actual == expected {
            Ok(())
        } else {
            Err(MemoryError::DimensionMismatch { expected, actual })
        }
    }
}
