//! The embedding-function seam and a deterministic local implementation.

use std::num::NonZeroUsize;

use async_trait::async_trait;

use crate::embeddings::EmbeddingVector;
use crate::MemoryResult;

/// Produces a fixed-dimension vector for arbitrary text.
///
/// Implementations are treated as opaque; remote ones live in
/// `recall-adapters`.
#[async_trait]
pub trait EmbeddingFunction: Send + Sync {
    /// Embeds `text`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Embedding`](crate::MemoryError::Embedding) when
    /// the backend is unreachable or returns malformed output.
    async fn embed(&self, text: &str) -> MemoryResult<EmbeddingVector>;

    /// Dimensionality of every vector this function returns.
    fn dimensions(&self) -> usize;

    /// Identifier used in logs.
    fn name(&self) -> &str;
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Feature-hashed bag-of-words embedder.
///
/// Lowercased alphanumeric tokens are hashed into buckets with a sign bit and
/// the result is L2-normalised. Identical text always yields identical
/// vectors, and texts sharing vocabulary have positive cosine similarity.
#[derive(Debug, Clone, Copy)]
pub struct HashEmbedder {
    dimensions: NonZeroUsize,
}

impl HashEmbedder {
    /// Creates an embedder producing `dimensions`-wide vectors.
    #[must_use]
    pub const fn new(dimensions: NonZeroUsize) -> Self {
        Self { dimensions }
    }

    /// Synchronous form of [`EmbeddingFunction::embed`].
    ///
    /// # Errors
    ///
    /// Never fails in practice; the signature mirrors vector validation.
    #[allow(clippy::cast_possible_truncation)]
    pub fn embed_sync(&self, text: &str) -> MemoryResult<EmbeddingVector> {
        let width = self.dimensions.get();
        let mut values = vec![0.0_f32; width];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
        {
            let hash = fnv1a(&token.to_lowercase());
            let bucket = (hash % width as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            values[bucket] += sign;
        }
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut values {
                *value /= norm;
            }
        }
        EmbeddingVector::new(values)
    }
}

#[async_trait]
impl EmbeddingFunction for HashEmbedder {
    async fn embed(&self, text: &str) -> MemoryResult<EmbeddingVector> {
        self.embed_sync(text)
    }

    fn dimensions(&self) -> usize {
        self.dimensions.get()
    }

    fn name(&self) -> &'static str {
        "hash"
    }
}

fn fnv1a(token: &str) -> u64 {
    token.bytes().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::cosine_similarity;

    fn embedder() -> HashEmbedder {
        HashEmbedder::new(NonZeroUsize::new(256).unwrap())
    }

    #[tokio::test]
    async fn identical_text_yields_identical_vectors() {
        let embedder = embedder();
        let a = embedder.embed("Average price per square foot").await.unwrap();
        let b = embedder.embed("average PRICE per square foot").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 256);
        assert!((a.magnitude() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn shared_vocabulary_scores_higher() {
        let embedder = embedder();
        let query = embedder.embed_sync("price per square foot in austin").unwrap();
        let related = embedder.embed_sync("austin price per square foot rose").unwrap();
        let unrelated = embedder.embed_sync("school district ratings").unwrap();
        let related_score = cosine_similarity(query.as_slice(), related.as_slice());
        let unrelated_score = cosine_similarity(query.as_slice(), unrelated.as_slice());
        assert!(related_score > unrelated_score);
    }

    #[test]
    fn empty_text_is_the_zero_vector() {
        let vector = embedder().embed_sync("  ,, ").unwrap();
        assert!(vector.as_slice().iter().all(|v| *v == 0.0));
    }
}
