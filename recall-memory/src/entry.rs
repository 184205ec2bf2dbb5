//! Memory entries held by the embedding store.

use chrono::{DateTime, Utc};
use recall_primitives::{MemoryId, UnitScore};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::embeddings::{EmbeddingVector, StoredEmbedding};
use crate::{MemoryError, MemoryResult};

/// Metadata key holding the entry importance in `[0, 1]`.
pub const IMPORTANCE_KEY: &str = "importance";
/// Metadata key holding the entry confidence in `[0, 1]`.
pub const CONFIDENCE_KEY: &str = "confidence";
/// Metadata key holding an array of string tags.
pub const TAGS_KEY: &str = "tags";

/// A single (text, embedding, metadata) entry.
///
/// Entries are immutable once shared; the optimizer replaces them wholesale.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    id: MemoryId,
    text: String,
    #[serde(skip)]
    embedding: StoredEmbedding,
    metadata: Map<String, Value>,
    created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    sequence: u64,
}

impl MemoryEntry {
    pub(crate) fn new(
        id: MemoryId,
        text: String,
        embedding: StoredEmbedding,
        metadata: Map<String, Value>,
        created_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
        sequence: u64,
    ) -> Self {
        Self {
            id,
            text,
            embedding,
            metadata,
            created_at,
            expires_at,
            sequence,
        }
    }

    /// Identifier assigned at insertion.
    #[must_use]
    pub fn id(&self) -> MemoryId {
        self.id
    }

    /// Text payload.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Stored embedding.
    #[must_use]
    pub fn embedding(&self) -> &StoredEmbedding {
        &self.embedding
    }

    /// Metadata map.
    #[must_use]
    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Insertion time.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Expiry time when a TTL policy applied at insertion.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Monotonic insertion order within the owning store.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Importance metadata, or [`UnitScore::NEUTRAL`] when absent.
    #[must_use]
    pub fn importance(&self) -> UnitScore {
        self.score_field(IMPORTANCE_KEY).unwrap_or(UnitScore::NEUTRAL)
    }

    /// Confidence metadata when present.
    #[must_use]
    pub fn confidence(&self) -> Option<UnitScore> {
        self.score_field(CONFIDENCE_KEY)
    }

    /// String tags stored under the `tags` metadata key.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.metadata
            .get(TAGS_KEY)
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
    }

    /// Returns `true` when every tag in `required` is present.
    #[must_use]
    pub fn has_tags(&self, required: &[String]) -> bool {
        required
            .iter()
            .all(|tag| self.tags().any(|existing| existing == tag))
    }

    /// Returns `true` once `now` has reached the expiry time.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now)
    }

    /// Age in fractional days, clamped at zero for clock skew.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        let millis = (now - self.created_at).num_milliseconds().max(0);
        millis as f64 / 86_400_000.0
    }

    /// Estimated heap footprint: text, serialized metadata and embedding data.
    #[must_use]
    pub fn estimated_bytes(&self) -> usize {
        self.text.len() + metadata_bytes(&self.metadata) + self.embedding.byte_size()
    }

    pub(crate) fn with_text(&self, text: String) -> Self {
        Self {
            text,
            ..self.clone()
        }
    }

    pub(crate) fn with_metadata(&self, metadata: Map<String, Value>) -> Self {
        Self {
            metadata,
            ..self.clone()
        }
    }

    pub(crate) fn with_embedding(&self, embedding: StoredEmbedding) -> Self {
        Self {
            embedding,
            ..self.clone()
        }
    }

    fn score_field(&self, key: &str) -> Option<UnitScore> {
        self.metadata
            .get(key)
            .and_then(Value::as_f64)
            .map(UnitScore::saturating)
    }
}

/// Input for [`EmbeddingStore::insert`](crate::EmbeddingStore::insert).
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub(crate) text: String,
    pub(crate) embedding: EmbeddingVector,
    pub(crate) metadata: Map<String, Value>,
}

impl NewMemory {
    /// Creates a memory with empty metadata.
    #[must_use]
    pub fn new(text: impl Into<String>, embedding: EmbeddingVector) -> Self {
        Self {
            text: text.into(),
            embedding,
            metadata: Map::new(),
        }
    }

    /// Replaces the metadata map.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Sets a single metadata field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Sets the importance field.
    #[must_use]
    pub fn with_importance(self, importance: UnitScore) -> Self {
        self.with_field(IMPORTANCE_KEY, importance.get())
    }

    /// Appends a tag to the `tags` metadata array.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        let tags = self
            .metadata
            .entry(TAGS_KEY)
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(values) = tags {
            values.push(Value::String(tag.into()));
        }
        self
    }

    /// Text payload.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Embedding supplied with the memory.
    #[must_use]
    pub fn embedding(&self) -> &EmbeddingVector {
        &self.embedding
    }
}

/// Validates the scored metadata fields of an incoming entry.
///
/// # Errors
///
/// Returns [`MemoryError::InvalidRecord`] when `importance` or `confidence`
/// is present but not a number in `[0, 1]`, or when `tags` is not an array
/// of strings.
pub fn validate_metadata(metadata: &Map<String, Value>) -> MemoryResult<()> {
    for key in [IMPORTANCE_KEY, CONFIDENCE_KEY] {
        if let Some(value) = metadata.get(key) {
            let number = value.as_f64().ok_or(MemoryError::InvalidRecord(
                "importance and confidence must be numbers",
            ))?;
            UnitScore::new(key, number)?;
        }
    }
    if let Some(tags) = metadata.get(TAGS_KEY) {
        let valid = tags
            .as_array()
            .is_some_and(|values| values.iter().all(Value::is_string));
        if !valid {
            return Err(MemoryError::InvalidRecord("tags must be an array of strings"));
        }
    }
    Ok(())
}

/// Serialized size of a metadata map in bytes.
#[must_use]
pub fn metadata_bytes(metadata: &Map<String, Value>) -> usize {
    serde_json::to_vec(metadata).map_or(0, |bytes| bytes.len())
}
