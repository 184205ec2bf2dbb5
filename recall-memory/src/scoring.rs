//! Pure ranking, decay and eviction functions.
//!
//! Nothing in here touches the store lock or performs I/O, so every curve can
//! be exercised directly from unit tests.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::config::{StoreConfig, TimeDecay};
use crate::entry::MemoryEntry;

/// Fraction of the original weight left after `age_days`: `2^(-age / half_life)`.
#[must_use]
pub fn recency(age_days: f64, half_life_days: f64) -> f64 {
    (-age_days.max(0.0) / half_life_days).exp2()
}

/// Multiplier applied to a raw similarity when time weighting is enabled.
///
/// A fresh entry keeps its full similarity; the multiplier approaches
/// `1 / max_boost` as the entry ages, so the result lies in `(1/max_boost, 1]`.
#[must_use]
pub fn decay_factor(age_days: f64, decay: TimeDecay) -> f64 {
    let boost = decay.max_boost();
    (1.0 + (boost - 1.0) * recency(age_days, decay.half_life_days())) / boost
}

/// Time-weighted score for a raw cosine similarity.
///
/// Age always lowers the score by `(1 - decay_factor) * |similarity|`, so an
/// older entry never outranks an identical fresh one, including for negative
/// similarities. For positive similarities this equals
/// `similarity * decay_factor`.
#[must_use]
pub fn time_weighted(similarity: f64, age_days: f64, decay: TimeDecay) -> f64 {
    similarity - (1.0 - decay_factor(age_days, decay)) * similarity.abs()
}

/// Combined recency/importance value used to choose eviction victims.
/// Lower is less valuable.
#[must_use]
pub fn eviction_value(entry: &MemoryEntry, now: DateTime<Utc>, config: &StoreConfig) -> f64 {
    let weights = config.eviction();
    let fresh = recency(entry.age_days(now), config.time_decay().half_life_days());
    weights.recency() * fresh + weights.importance() * entry.importance().get()
}

/// Orders entries from most to least evictable.
///
/// Expired entries come first, then ascending eviction value, then insertion
/// order.
#[must_use]
pub fn eviction_order(
    lhs: &MemoryEntry,
    rhs: &MemoryEntry,
    now: DateTime<Utc>,
    config: &StoreConfig,
) -> Ordering {
    rhs.is_expired(now)
        .cmp(&lhs.is_expired(now))
        .then_with(|| {
            eviction_value(lhs, now, config).total_cmp(&eviction_value(rhs, now, config))
        })
        .then_with(|| lhs.sequence().cmp(&rhs.sequence()))
}

/// Greedy maximal-marginal-relevance selection.
///
/// `candidates` must already be sorted by descending score. Each round picks
/// the candidate maximising `score - diversity * max_similarity(selected)`.
/// With `diversity <= 0` this is a plain truncation. Returned scores are the
/// original, unpenalised ones.
pub fn select_diverse<T, F>(
    candidates: Vec<(T, f64)>,
    limit: usize,
    diversity: f64,
    similarity: F,
) -> Vec<(T, f64)>
where
    F: Fn(&T, &T) -> f64,
{
    if diversity <= 0.0 || candidates.len() <= 1 {
        let mut candidates = candidates;
        candidates.truncate(limit);
        return candidates;
    }

    let mut remaining = candidates;
    let mut selected: Vec<(T, f64)> = Vec::with_capacity(limit.min(remaining.len()));
    while selected.len() < limit && !remaining.is_empty() {
        let mut best = 0;
        let mut best_value = f64::NEG_INFINITY;
        for (index, (candidate, score)) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|(chosen, _)| similarity(candidate, chosen))
                .fold(0.0_f64, f64::max);
            let adjusted = score - diversity * redundancy;
            if adjusted > best_value {
                best = index;
                best_value = adjusted;
            }
        }
        selected.push(remaining.remove(best));
    }
    selected
}
