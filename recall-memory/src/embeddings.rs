//! Embedding vectors and their stored, possibly reduced-precision, form.

use std::sync::Arc;

use half::f16;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{MemoryError, MemoryResult};

/// Wrapper type around an immutable floating-point embedding.
#[derive(Clone, PartialEq)]
pub struct EmbeddingVector {
    values: Arc<[f32]>,
}

impl EmbeddingVector {
    /// Creates a new embedding from owned values.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidRecord`] when the supplied vector is empty
    /// or contains non-finite values.
    pub fn new(values: Vec<f32>) -> MemoryResult<Self> {
        if values.is_empty() {
            return Err(MemoryError::InvalidRecord(
                "embedding vector must not be empty",
            ));
        }
        if !values.iter().all(|value| value.is_finite()) {
            return Err(MemoryError::InvalidRecord(
                "embedding vector contains non-finite values",
            ));
        }
        Ok(Self {
            values: Arc::<[f32]>::from(values.into_boxed_slice()),
        })
    }

    /// Creates an embedding by copying the provided slice.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidRecord`] if the slice is empty or contains
    /// non-finite values.
    pub fn from_slice(values: &[f32]) -> MemoryResult<Self> {
        Self::new(values.to_vec())
    }

    /// Creates an embedding from double-precision values, narrowing each component.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidRecord`] if the input is empty or any
    /// component is not representable as a finite `f32`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_f64(values: &[f64]) -> MemoryResult<Self> {
        Self::new(values.iter().map(|value| *value as f32).collect())
    }

    /// Returns an immutable view of the embedding data.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Returns the dimensionality of the embedding.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns whether the embedding is empty. Never true for validated vectors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean norm of the vector.
    #[must_use]
    pub fn magnitude(&self) -> f32 {
        self.values
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt()
    }
}

impl std::fmt::Debug for EmbeddingVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingVector")
            .field("dimensions", &self.len())
            .finish()
    }
}

impl Serialize for EmbeddingVector {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.values.as_ref().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EmbeddingVector {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let values = Vec::<f32>::deserialize(deserializer)?;
        Self::new(values).map_err(serde::de::Error::custom)
    }
}

/// Numeric precision used when an embedding is stored.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingPrecision {
    /// 32-bit IEEE floats.
    #[default]
    Full,
    /// 16-bit IEEE half floats.
    Half,
    /// 8-bit signed integers with a per-vector scale.
    Int8,
}

impl EmbeddingPrecision {
    /// Maps a bit width (32, 16 or 8) to a precision tier.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] for any other width.
    pub fn from_bits(bits: u8) -> MemoryResult<Self> {
        match bits {
            32 => Ok(Self::Full),
            16 => Ok(Self::Half),
            8 => Ok(Self::Int8),
            _ => Err(MemoryError::InvalidConfig(
                "embedding precision must be 32, 16 or 8 bits",
            )),
        }
    }

    /// Bit width of a single stored component.
    #[must_use]
    pub const fn bits(self) -> u8 {
        match self {
            Self::Full => 32,
            Self::Half => 16,
            Self::Int8 => 8,
        }
    }

    /// Bytes occupied by one stored component.
    #[must_use]
    pub const fn bytes_per_component(self) -> usize {
        self.bits() as usize / 8
    }
}

#[derive(Clone, PartialEq)]
enum Repr {
    Full(Arc<[f32]>),
    Half(Arc<[f16]>),
    Int8 { scale: f32, values: Arc<[i8]> },
}

/// Embedding as held by the store. Dimension-preserving but possibly lossy.
#[derive(Clone, PartialEq)]
pub struct StoredEmbedding {
    repr: Repr,
    norm: f32,
}

impl StoredEmbedding {
    /// Encodes `vector` at the requested precision.
    #[must_use]
    pub fn encode(vector: &EmbeddingVector, precision: EmbeddingPrecision) -> Self {
        Self::encode_slice(vector.as_slice(), precision)
    }

    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn encode_slice(values: &[f32], precision: EmbeddingPrecision) -> Self {
        let repr = match precision {
            EmbeddingPrecision::Full => Repr::Full(Arc::from(values)),
            EmbeddingPrecision::Half => {
                // Saturate instead of overflowing to infinity, which would
                // make the norm infinite and every cosine NaN.
                let limit = f16::MAX.to_f32();
                Repr::Half(
                    values
                        .iter()
                        .map(|value| f16::from_f32(value.clamp(-limit, limit)))
                        .collect(),
                )
            }
            EmbeddingPrecision::Int8 => {
                let max_abs = values.iter().fold(0.0_f32, |acc, v| acc.max(v.abs()));
                let scale = if max_abs > 0.0 { max_abs / 127.0 } else { 1.0 };
                let quantized = values
                    .iter()
                    .map(|value| (value / scale).round().clamp(-127.0, 127.0) as i8)
                    .collect();
                Repr::Int8 {
                    scale,
                    values: quantized,
                }
            }
        };
        let mut stored = Self { repr, norm: 0.0 };
        stored.norm = stored.components().map(|v| v * v).sum::<f32>().sqrt();
        stored
    }

    /// Precision tier of the stored data.
    #[must_use]
    pub fn precision(&self) -> EmbeddingPrecision {
        match self.repr {
            Repr::Full(_) => EmbeddingPrecision::Full,
            Repr::Half(_) => EmbeddingPrecision::Half,
            Repr::Int8 { .. } => EmbeddingPrecision::Int8,
        }
    }

    /// Number of dimensions.
    #[must_use]
    pub fn len(&self) -> usize {
        match &self.repr {
            Repr::Full(values) => values.len(),
            Repr::Half(values) => values.len(),
            Repr::Int8 { values, .. } => values.len(),
        }
    }

    /// Returns `true` when the embedding has no components.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Approximate heap footprint of the component data.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        let scale = if matches!(self.repr, Repr::Int8 { .. }) { 4 } else { 0 };
        self.len() * self.precision().bytes_per_component() + scale
    }

    /// Decodes every component back to `f32`.
    #[must_use]
    pub fn to_vec(&self) -> Vec<f32> {
        self.components().collect()
    }

    /// Re-encodes at a different precision. A no-op when the tier already matches.
    #[must_use]
    pub fn with_precision(&self, precision: EmbeddingPrecision) -> Self {
        if self.precision() == precision {
            self.clone()
        } else {
            Self::encode_slice(&self.to_vec(), precision)
        }
    }

    /// Cosine similarity against a full-precision query.
    ///
    /// Dimensions are expected to match; mismatches are rejected by the store
    /// before this is reached.
    #[must_use]
    pub fn cosine(&self, query: &[f32], query_norm: f32) -> f32 {
        debug_assert_eq!(self.len(), query.len());
        let denominator = self.norm * query_norm;
        if denominator == 0.0 {
            return 0.0;
        }
        let dot: f32 = self.components().zip(query).map(|(a, b)| a * b).sum();
        dot / denominator
    }

    /// Cosine similarity between two stored embeddings of equal length.
    #[must_use]
    pub fn similarity(&self, other: &Self) -> f32 {
        let denominator = self.norm * other.norm;
        if denominator == 0.0 {
            return 0.0;
        }
        let dot: f32 = self
            .components()
            .zip(other.components())
            .map(|(a, b)| a * b)
            .sum();
        dot / denominator
    }

    fn components(&self) -> Box<dyn Iterator<Item = f32> + '_> {
        match &self.repr {
            Repr::Full(values) => Box::new(values.iter().copied()),
            Repr::Half(values) => Box::new(values.iter().map(|v| v.to_f32())),
            Repr::Int8 { scale, values } => {
                let scale = *scale;
                Box::new(values.iter().map(move |v| f32::from(*v) * scale))
            }
        }
    }
}

impl std::fmt::Debug for StoredEmbedding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredEmbedding")
            .field("dimensions", &self.len())
            .field("precision", &self.precision())
            .finish()
    }
}

/// Cosine similarity between two plain slices of equal length.
#[must_use]
pub fn cosine_similarity(lhs: &[f32], rhs: &[f32]) -> f32 {
    let numerator: f32 = lhs.iter().zip(rhs).map(|(a, b)| a * b).sum();
    let lhs_norm = lhs.iter().map(|v| v * v).sum::<f32>().sqrt();
    let rhs_norm = rhs.iter().map(|v| v * v).sum::<f32>().sqrt();
    let denominator = lhs_norm * rhs_norm;
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}
