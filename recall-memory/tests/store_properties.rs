use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use recall_memory::{
    EmbeddingPrecision, EmbeddingStore, EmbeddingVector, HashEmbedder, MemoryError, NewMemory,
    SearchOptions, StoreConfig,
};
use recall_primitives::UnitScore;
use serde_json::{Map, json};

fn config(max_entries: usize) -> StoreConfig {
    StoreConfig::new(
        NonZeroUsize::new(3).unwrap(),
        NonZeroUsize::new(max_entries).unwrap(),
    )
    .with_time_weighted_search(false)
}

fn vector(values: [f32; 3]) -> EmbeddingVector {
    EmbeddingVector::new(values.to_vec()).unwrap()
}

fn memory(text: &str, values: [f32; 3]) -> NewMemory {
    NewMemory::new(text, vector(values))
}

#[tokio::test]
async fn size_never_exceeds_capacity() {
    let store = EmbeddingStore::new(config(7));
    for i in 0..50 {
        #[allow(clippy::cast_precision_loss)]
        let x = i as f32;
        store
            .insert(memory(&format!("entry {i}"), [1.0, x, 0.5]))
            .await
            .unwrap();
        assert!(store.len().await <= 7);
    }
    assert_eq!(store.len().await, 7);
    assert_eq!(store.stats().await.evictions, 43);
}

#[tokio::test]
async fn eviction_keeps_most_recent_entries() {
    let store = EmbeddingStore::new(config(2));
    let start = Utc::now();
    let mut ids = Vec::new();
    for (offset, text) in ["first", "second", "third"].into_iter().enumerate() {
        let now = start + TimeDelta::hours(i64::try_from(offset).unwrap());
        let entry = store
            .insert_at(memory(text, [1.0, 0.0, 0.0]), now)
            .await
            .unwrap();
        ids.push(entry.id());
    }
    assert_eq!(store.len().await, 2);
    assert!(store.get(ids[0]).await.is_none());
    assert!(store.get(ids[1]).await.is_some());
    assert!(store.get(ids[2]).await.is_some());
}

#[tokio::test]
async fn eviction_spares_important_entries() {
    let store = EmbeddingStore::new(config(2));
    let start = Utc::now();
    let important = store
        .insert_at(
            memory("important", [1.0, 0.0, 0.0]).with_importance(UnitScore::ONE),
            start,
        )
        .await
        .unwrap();
    let filler = store
        .insert_at(
            memory("filler", [0.0, 1.0, 0.0]).with_importance(UnitScore::ZERO),
            start + TimeDelta::seconds(1),
        )
        .await
        .unwrap();
    store
        .insert_at(memory("latest", [0.0, 0.0, 1.0]), start + TimeDelta::seconds(2))
        .await
        .unwrap();

    assert!(store.get(important.id()).await.is_some());
    assert!(store.get(filler.id()).await.is_none());
}

#[tokio::test]
async fn mismatched_dimensions_are_rejected() {
    let store = EmbeddingStore::new(config(4));
    let wide = EmbeddingVector::new(vec![1.0, 0.0, 0.0, 0.0]).unwrap();

    let err = store.search(&wide, &SearchOptions::default()).await.unwrap_err();
    assert!(matches!(err, MemoryError::DimensionMismatch { expected: 3, actual: 4 }));

    store.insert(memory("a", [1.0, 0.0, 0.0])).await.unwrap();
    let err = store.search(&wide, &SearchOptions::default()).await.unwrap_err();
    assert!(matches!(err, MemoryError::DimensionMismatch { .. }));

    let err = store.insert(NewMemory::new("b", wide)).await.unwrap_err();
    assert!(matches!(err, MemoryError::DimensionMismatch { .. }));
}

#[tokio::test]
async fn empty_store_returns_no_results() {
    let store = EmbeddingStore::new(config(4));
    let results = store
        .search(&vector([1.0, 0.0, 0.0]), &SearchOptions::default())
        .await
        .unwrap();
    assert!(results.is_empty());
}

async fn populated_store() -> EmbeddingStore {
    let store = EmbeddingStore::new(config(32));
    let points = [
        [1.0, 0.0, 0.0],
        [0.95, 0.05, 0.0],
        [0.9, 0.1, 0.1],
        [0.7, 0.7, 0.0],
        [0.5, 0.5, 0.5],
        [0.0, 1.0, 0.0],
        [0.1, 0.2, 0.9],
        [-1.0, 0.0, 0.0],
    ];
    for (index, point) in points.into_iter().enumerate() {
        store
            .insert(memory(&format!("point {index}"), point))
            .await
            .unwrap();
    }
    store
}

#[tokio::test]
async fn raising_threshold_never_adds_results() {
    let store = populated_store().await;
    let query = vector([1.0, 0.1, 0.0]);
    for diversity in [0.0, 0.5, 1.0] {
        let mut previous = usize::MAX;
        for threshold in [-1.0, -0.5, 0.0, 0.3, 0.6, 0.8, 0.9, 0.99, 1.0] {
            let options = SearchOptions::new(10)
                .with_threshold(threshold)
                .with_diversity_factor(diversity);
            let count = store.search(&query, &options).await.unwrap().len();
            assert!(count <= previous, "threshold {threshold} grew results");
            previous = count;
        }
    }
}

#[tokio::test]
async fn results_are_sorted_without_diversity() {
    let store = populated_store().await;
    let results = store
        .search(&vector([0.8, 0.3, 0.1]), &SearchOptions::new(8))
        .await
        .unwrap();
    assert_eq!(results.len(), 8);
    assert!(results.windows(2).all(|pair| pair[0].score >= pair[1].score));
}

#[tokio::test]
async fn diversity_demotes_near_duplicates() {
    let store = EmbeddingStore::new(config(8));
    store.insert(memory("original", [1.0, 0.0, 0.0])).await.unwrap();
    store.insert(memory("near duplicate", [1.0, 0.05, 0.0])).await.unwrap();
    store.insert(memory("distinct", [0.6, 0.0, 0.8])).await.unwrap();
    let query = vector([0.9, 0.0, 0.44]);

    let plain = store.search(&query, &SearchOptions::new(2)).await.unwrap();
    assert_eq!(plain[0].entry.text(), "original");
    assert_eq!(plain[1].entry.text(), "near duplicate");

    let diverse = store
        .search(&query, &SearchOptions::new(2).with_diversity_factor(1.0))
        .await
        .unwrap();
    assert_eq!(diverse[0].entry.text(), "original");
    assert_eq!(diverse[1].entry.text(), "distinct");
}

#[tokio::test]
async fn high_threshold_without_close_matches_is_empty() {
    let store = EmbeddingStore::new(config(8));
    store.insert(memory("x", [1.0, 0.0, 0.0])).await.unwrap();
    store.insert(memory("y", [0.0, 1.0, 0.0])).await.unwrap();
    let options = SearchOptions::new(5).with_threshold(0.9);
    let results = store.search(&vector([1.0, 1.0, 1.0]), &options).await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn time_weighting_prefers_recent_entries() {
    let store = EmbeddingStore::new(config(8).with_time_weighted_search(true));
    let now = Utc::now();
    store
        .insert_at(memory("old", [1.0, 0.0, 0.0]), now - TimeDelta::days(90))
        .await
        .unwrap();
    store.insert_at(memory("new", [1.0, 0.0, 0.0]), now).await.unwrap();

    let results = store
        .search_at(&vector([1.0, 0.0, 0.0]), &SearchOptions::new(2), now)
        .await
        .unwrap();
    assert_eq!(results[0].entry.text(), "new");
    assert!(results[1].score < results[1].similarity);
    assert!(results[1].score > results[1].similarity / 1.5);
}

#[tokio::test]
async fn time_weighting_prefers_recent_entries_for_negative_similarity() {
    let store = EmbeddingStore::new(config(8).with_time_weighted_search(true));
    let now = Utc::now();
    store
        .insert_at(memory("old", [-1.0, 0.0, 0.0]), now - TimeDelta::days(365))
        .await
        .unwrap();
    store.insert_at(memory("new", [-1.0, 0.0, 0.0]), now).await.unwrap();

    let results = store
        .search_at(
            &vector([1.0, 0.0, 0.0]),
            &SearchOptions::new(2).with_threshold(-2.0),
            now,
        )
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].entry.text(), "new");
    assert!(results[1].score < results[0].score);
    assert!(results[1].score < results[1].similarity);
}

#[tokio::test]
async fn half_precision_keeps_large_components_searchable() {
    let store = EmbeddingStore::new(config(4).with_precision(EmbeddingPrecision::Half));
    store
        .insert(memory("large", [1.0e5, 2.0e5, 0.0]))
        .await
        .unwrap();

    let results = store
        .search(
            &vector([1.0e5, 2.0e5, 0.0]),
            &SearchOptions::new(1).with_threshold(0.9),
        )
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].score.is_finite());
}

#[tokio::test]
async fn expired_entries_are_hidden_and_compacted() {
    let store = EmbeddingStore::new(config(8).with_ttl(Duration::from_secs(3600)));
    let now = Utc::now();
    store
        .insert_at(memory("stale", [1.0, 0.0, 0.0]), now - TimeDelta::hours(2))
        .await
        .unwrap();
    store.insert_at(memory("fresh", [1.0, 0.0, 0.0]), now).await.unwrap();

    let results = store
        .search_at(&vector([1.0, 0.0, 0.0]), &SearchOptions::new(5), now)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].entry.text(), "fresh");

    let report = store.optimize_memory_at(now).await;
    assert_eq!(report.entries_before, 2);
    assert_eq!(report.entries_after, 1);
    assert_eq!(report.expired_removed, 1);
    assert!(report.memory_reduction > 0);
    assert_eq!(store.stats().await.expirations, 1);
}

#[tokio::test]
async fn optimisation_is_idempotent() {
    let store = EmbeddingStore::new(config(8).with_ttl(Duration::from_secs(60)));
    let now = Utc::now();
    for i in 0..5 {
        let at = now - TimeDelta::seconds(i * 30);
        store
            .insert_at(memory(&format!("m{i}"), [1.0, 0.0, 0.0]), at)
            .await
            .unwrap();
    }
    let first = store.optimize_memory_at(now).await;
    let second = store.optimize_memory_at(now).await;
    assert_eq!(first.entries_after, second.entries_after);
    assert_eq!(second.entries_before, second.entries_after);
    assert_eq!(second.memory_reduction, 0);
    assert!(second.is_noop());
}

#[tokio::test]
async fn long_text_and_metadata_are_bounded_on_insert() {
    let config = config(4)
        .with_max_text_length(NonZeroUsize::new(100).unwrap())
        .with_max_metadata_bytes(NonZeroUsize::new(64).unwrap());
    let store = EmbeddingStore::new(config);
    let metadata = json!({"source": "chat", "debug": "d".repeat(500)});
    let entry = store
        .insert(
            memory(&"A".repeat(2000), [1.0, 0.0, 0.0])
                .with_metadata(metadata.as_object().unwrap().clone()),
        )
        .await
        .unwrap();
    assert!(entry.text().chars().count() <= 100);
    assert!(entry.metadata().contains_key("source"));
    assert!(!entry.metadata().contains_key("debug"));
}

#[tokio::test]
async fn invalid_metadata_scores_are_rejected() {
    let store = EmbeddingStore::new(config(4));
    let err = store
        .insert(memory("x", [1.0, 0.0, 0.0]).with_field("confidence", 2.0))
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::InvalidRecord(_)));
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn required_tags_filter_results() {
    let store = EmbeddingStore::new(config(4));
    store
        .insert(memory("tagged", [1.0, 0.0, 0.0]).with_tag("pricing"))
        .await
        .unwrap();
    store.insert(memory("plain", [1.0, 0.0, 0.0])).await.unwrap();
    let options = SearchOptions::new(5).with_required_tags(["pricing"]);
    let results = store.search(&vector([1.0, 0.0, 0.0]), &options).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].entry.text(), "tagged");
}

#[tokio::test]
async fn reduced_precision_keeps_ranking() {
    for precision in [EmbeddingPrecision::Half, EmbeddingPrecision::Int8] {
        let store = EmbeddingStore::new(config(4).with_precision(precision));
        store.insert(memory("near", [0.9, 0.1, 0.0])).await.unwrap();
        store.insert(memory("far", [0.0, 0.2, 0.9])).await.unwrap();
        let results = store
            .search(&vector([1.0, 0.0, 0.0]), &SearchOptions::new(2))
            .await
            .unwrap();
        assert_eq!(results[0].entry.text(), "near");
        assert_eq!(store.stats().await.precision_bits, precision.bits());
    }
}

#[tokio::test]
async fn insert_text_uses_attached_embedder() {
    let dims = NonZeroUsize::new(256).unwrap();
    let store = EmbeddingStore::new(StoreConfig::new(dims, NonZeroUsize::new(4).unwrap()))
        .with_embedder(Arc::new(HashEmbedder::new(dims)));
    store
        .insert_text("median listing price in austin", Map::new())
        .await
        .unwrap();
    store
        .insert_text("school ratings for the district", Map::new())
        .await
        .unwrap();
    let query = HashEmbedder::new(dims).embed_sync("austin listing price").unwrap();
    let results = store.search(&query, &SearchOptions::new(1)).await.unwrap();
    assert_eq!(results[0].entry.text(), "median listing price in austin");
}

#[tokio::test]
async fn insert_text_without_embedder_fails() {
    let store = EmbeddingStore::new(config(4));
    let err = store.insert_text("x", Map::new()).await.unwrap_err();
    assert!(matches!(err, MemoryError::InvalidConfig(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_inserts_at_capacity_evict_once() {
    for _ in 0..20 {
        let store = Arc::new(EmbeddingStore::new(config(5)));
        for i in 0..4 {
            store
                .insert(memory(&format!("seed {i}"), [1.0, 0.0, 0.0]))
                .await
                .unwrap();
        }
        let inserts = (0..2).map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .insert(memory(&format!("racer {i}"), [0.0, 1.0, 0.0]))
                    .await
            })
        });
        for result in futures::future::join_all(inserts).await {
            result.unwrap().unwrap();
        }
        let stats = store.stats().await;
        assert_eq!(stats.entries, 5);
        assert_eq!(stats.evictions, 1);
    }
}

#[tokio::test]
async fn remove_and_clear() {
    let store = EmbeddingStore::new(config(4));
    let entry = store.insert(memory("x", [1.0, 0.0, 0.0])).await.unwrap();
    assert!(store.remove(entry.id()).await.is_some());
    assert!(store.remove(entry.id()).await.is_none());
    store.insert(memory("y", [1.0, 0.0, 0.0])).await.unwrap();
    store.clear().await;
    assert!(store.is_empty().await);
    assert_eq!(store.evict_if_over_capacity().await, 0);
}

#[tokio::test]
async fn min_confidence_skips_uncertain_entries() {
    let store = EmbeddingStore::new(config(4));
    store
        .insert(memory("guess", [1.0, 0.0, 0.0]).with_field("confidence", 0.3))
        .await
        .unwrap();
    store
        .insert(memory("verified", [1.0, 0.0, 0.0]).with_field("confidence", 0.9))
        .await
        .unwrap();
    store.insert(memory("unrated", [1.0, 0.0, 0.0])).await.unwrap();

    let options = SearchOptions::new(5).with_min_confidence(0.6);
    let mut texts: Vec<_> = store
        .search(&vector([1.0, 0.0, 0.0]), &options)
        .await
        .unwrap()
        .into_iter()
        .map(|result| result.entry.text().to_owned())
        .collect();
    texts.sort();
    assert_eq!(texts, vec!["unrated", "verified"]);
}
