//! Text, embedding and metadata compaction.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::embeddings::{EmbeddingPrecision, EmbeddingVector, StoredEmbedding};
use crate::entry::{CONFIDENCE_KEY, IMPORTANCE_KEY, metadata_bytes};
use crate::MemoryResult;

const ELLIPSIS: &str = "...";
const VERBOSE_KEYS: [&str; 5] = ["debug", "trace", "raw", "stack", "verbose"];
const MAX_METADATA_STRING_CHARS: usize = 256;

/// Top-level metadata fields preserved at the expense of everything else.
pub const PROTECTED_METADATA_KEYS: [&str; 5] =
    ["source", "timestamp", "category", IMPORTANCE_KEY, CONFIDENCE_KEY];

/// Truncates `text` to at most `max_chars` characters.
///
/// Text within bounds is returned untouched. Longer text keeps roughly three
/// quarters of the budget from the head and the rest from the tail, joined by
/// an ellipsis.
#[must_use]
pub fn optimize_text(text: &str, max_chars: usize) -> String {
    let length = text.chars().count();
    if length <= max_chars {
        return text.to_owned();
    }
    let marker = ELLIPSIS.chars().count();
    if max_chars <= marker {
        return text.chars().take(max_chars).collect();
    }
    let budget = max_chars - marker;
    let head = budget.div_ceil(4) * 3;
    let head = head.min(budget);
    let tail = budget - head;

    let mut out = String::with_capacity(text.len().min(max_chars * 4));
    out.extend(text.chars().take(head));
    out.push_str(ELLIPSIS);
    out.extend(text.chars().skip(length - tail));
    out
}

/// Re-encodes `vector` at `precision_bits` (32, 16 or 8).
///
/// # Errors
///
/// Returns [`MemoryError::InvalidConfig`](crate::MemoryError::InvalidConfig)
/// for any other width.
pub fn compress_embedding(
    vector: &EmbeddingVector,
    precision_bits: u8,
) -> MemoryResult<StoredEmbedding> {
    let precision = EmbeddingPrecision::from_bits(precision_bits)?;
    Ok(StoredEmbedding::encode(vector, precision))
}

/// Shrinks `metadata` until its serialized form fits in `max_bytes`.
///
/// Passes run in order and stop as soon as the budget is met: verbose debug
/// keys are dropped, long strings truncated, nested structures removed, and
/// finally the largest unprotected keys discarded. Protected identification
/// fields are never removed, so the result may still exceed the budget when
/// they alone do.
#[must_use]
pub fn compress_metadata(metadata: &Map<String, Value>, max_bytes: usize) -> Map<String, Value> {
    let mut out = metadata.clone();
    if metadata_bytes(&out) <= max_bytes {
        return out;
    }

    out.retain(|key, _| is_protected(key) || !is_verbose(key));
    if metadata_bytes(&out) <= max_bytes {
        return out;
    }

    for (key, value) in &mut out {
        if is_protected(key) {
            continue;
        }
        if let Value::String(text) = value {
            if text.chars().count() > MAX_METADATA_STRING_CHARS {
                *text = optimize_text(text, MAX_METADATA_STRING_CHARS);
            }
        }
    }
    if metadata_bytes(&out) <= max_bytes {
        return out;
    }

    out.retain(|key, value| is_protected(key) || !is_nested(value));

    while metadata_bytes(&out) > max_bytes {
        let largest = out
            .iter()
            .filter(|(key, _)| !is_protected(key))
            .max_by_key(|(_, value)| serde_json::to_vec(value).map_or(0, |bytes| bytes.len()))
            .map(|(key, _)| key.clone());
        match largest {
            Some(key) => {
                out.remove(&key);
            }
            None => break,
        }
    }
    out
}

fn is_protected(key: &str) -> bool {
    PROTECTED_METADATA_KEYS.contains(&key)
}

fn is_verbose(key: &str) -> bool {
    key.starts_with('_') || VERBOSE_KEYS.contains(&key.to_ascii_lowercase().as_str())
}

fn is_nested(value: &Value) -> bool {
    match value {
        Value::Object(_) => true,
        Value::Array(items) => items.iter().any(|item| item.is_object() || item.is_array()),
        _ => false,
    }
}

/// Outcome of a store-wide [`optimize_memory`](crate::EmbeddingStore::optimize_memory) pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationReport {
    /// Entry count before the pass.
    pub entries_before: usize,
    /// Entry count after the pass.
    pub entries_after: usize,
    /// Entries removed because their TTL elapsed.
    pub expired_removed: usize,
    /// Entries evicted to get back under capacity.
    pub evicted: usize,
    /// Entries whose text was truncated.
    pub texts_truncated: usize,
    /// Entries whose metadata was compacted.
    pub metadata_compacted: usize,
    /// Entries whose embedding was re-encoded at the configured precision.
    pub embeddings_requantized: usize,
    /// Estimated bytes held before the pass.
    pub bytes_before: usize,
    /// Estimated bytes held after the pass.
    pub bytes_after: usize,
    /// `bytes_before - bytes_after`.
    pub memory_reduction: usize,
}

impl OptimizationReport {
    /// Returns `true` when the pass changed nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.entries_before == self.entries_after && self.memory_reduction == 0
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn text_within_bounds_is_untouched() {
        assert_eq!(optimize_text("short", 10), "short");
        assert_eq!(optimize_text("exact", 5), "exact");
    }

    #[test]
    fn long_text_is_bounded() {
        let text = "A".repeat(2000);
        let out = optimize_text(&text, 1000);
        assert_eq!(out.chars().count(), 1000);
        assert!(out.contains("..."));
    }

    #[test]
    fn truncation_is_head_biased_and_keeps_tail() {
        let text: String = ('a'..='z').collect();
        let out = optimize_text(&text, 11);
        // budget 8 -> 6 head, 2 tail
        assert_eq!(out, "abcdef...yz");
    }

    #[test]
    fn tiny_limits_take_a_prefix() {
        assert_eq!(optimize_text("abcdef", 2), "ab");
        assert_eq!(optimize_text("abcdef", 0), "");
    }

    #[test]
    fn multibyte_text_counts_chars() {
        let text = "é".repeat(50);
        let out = optimize_text(&text, 20);
        assert_eq!(out.chars().count(), 20);
    }

    #[test]
    fn compress_embedding_preserves_dimensions() {
        let vector = EmbeddingVector::from_f64(&[0.25, -0.5, 1.0]).unwrap();
        for bits in [32, 16, 8] {
            let stored = compress_embedding(&vector, bits).unwrap();
            assert_eq!(stored.len(), 3);
        }
        assert!(compress_embedding(&vector, 4).is_err());
    }

    #[test]
    fn metadata_under_budget_is_unchanged() {
        let metadata = json!({"source": "chat", "debug": "x"});
        let map = metadata.as_object().unwrap();
        assert_eq!(&compress_metadata(map, 1024), map);
    }

    #[test]
    fn verbose_fields_go_first() {
        let metadata = json!({
            "source": "chat",
            "category": "pricing",
            "debug": "x".repeat(400),
            "_internal": 1,
            "note": "keep me"
        });
        let out = compress_metadata(metadata.as_object().unwrap(), 80);
        assert!(out.contains_key("source"));
        assert!(out.contains_key("category"));
        assert!(out.contains_key("note"));
        assert!(!out.contains_key("debug"));
        assert!(!out.contains_key("_internal"));
    }

    #[test]
    fn nested_and_large_fields_are_dropped_until_under_budget() {
        let metadata = json!({
            "source": "chat",
            "timestamp": "2024-01-01T00:00:00Z",
            "category": "pricing",
            "context": {"a": {"b": "c".repeat(100)}},
            "summary": "s".repeat(300),
            "tags": ["x"]
        });
        let out = compress_metadata(metadata.as_object().unwrap(), 120);
        assert!(metadata_bytes(&out) <= 120);
        for key in ["source", "timestamp", "category"] {
            assert!(out.contains_key(key));
        }
        assert!(!out.contains_key("context"));
    }

    #[test]
    fn protected_fields_survive_an_impossible_budget() {
        let metadata = json!({"source": "s".repeat(100), "extra": 1});
        let out = compress_metadata(metadata.as_object().unwrap(), 10);
        assert!(out.contains_key("source"));
        assert!(!out.contains_key("extra"));
    }
}
