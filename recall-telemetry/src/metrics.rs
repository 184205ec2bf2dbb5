//! Request counters, error categories and latency percentiles.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;

const LATENCY_WINDOW: usize = 1024;

/// Kinds of request counted separately.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestKind {
    /// Context-augmented generation.
    Execute,
    /// Retrieval without generation.
    Query,
    /// Explicit memory write.
    MemoryWrite,
}

/// Process-wide metrics. Recording never blocks for long and never panics.
#[derive(Debug, Default)]
pub struct ServiceMetrics {
    executions: AtomicU64,
    queries: AtomicU64,
    memory_writes: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    degraded: AtomicU64,
    hybrid: AtomicU64,
    latencies_ms: Mutex<VecDeque<u64>>,
    errors: Mutex<BTreeMap<&'static str, u64>>,
}

impl ServiceMetrics {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Counts one successful request of `kind` and its latency.
    pub fn record_success(&self, kind: RequestKind, elapsed: Duration) {
        self.counter(kind).fetch_add(1, Ordering::Relaxed);
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.push_latency(elapsed);
    }

    /// Counts one failed request of `kind` under `category`.
    pub fn record_failure(&self, kind: RequestKind, category: &'static str, elapsed: Duration) {
        self.counter(kind).fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.push_latency(elapsed);
        let mut errors = self.errors.lock().unwrap_or_else(PoisonError::into_inner);
        *errors.entry(category).or_default() += 1;
    }

    /// Marks the last generation as context-augmented.
    pub fn record_hybrid(&self) {
        self.hybrid.fetch_add(1, Ordering::Relaxed);
    }

    /// Marks the last generation as degraded by a retrieval failure.
    pub fn record_degraded(&self) {
        self.degraded.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a consistent-enough copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let latencies: Vec<u64> = self
            .latencies_ms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect();
        let errors = self
            .errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(category, count)| ((*category).to_owned(), *count))
            .collect();

        MetricsSnapshot {
            request_counts: RequestCounts {
                execute: self.executions.load(Ordering::Relaxed),
                query: self.queries.load(Ordering::Relaxed),
                memory_write: self.memory_writes.load(Ordering::Relaxed),
                succeeded: self.succeeded.load(Ordering::Relaxed),
                failed: self.failed.load(Ordering::Relaxed),
                hybrid: self.hybrid.load(Ordering::Relaxed),
                degraded: self.degraded.load(Ordering::Relaxed),
            },
            latency_percentiles: LatencyPercentiles::from_samples(latencies),
            errors,
        }
    }

    const fn counter(&self, kind: RequestKind) -> &AtomicU64 {
        match kind {
            RequestKind::Execute => &self.executions,
            RequestKind::Query => &self.queries,
            RequestKind::MemoryWrite => &self.memory_writes,
        }
    }

    fn push_latency(&self, elapsed: Duration) {
        let millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let mut window = self.latencies_ms.lock().unwrap_or_else(PoisonError::into_inner);
        if window.len() == LATENCY_WINDOW {
            window.pop_front();
        }
        window.push_back(millis);
    }
}

/// Request totals since start.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestCounts {
    /// Generation requests.
    pub execute: u64,
    /// Retrieval-only requests.
    pub query: u64,
    /// Explicit memory writes.
    pub memory_write: u64,
    /// Requests that succeeded.
    pub succeeded: u64,
    /// Requests that failed.
    pub failed: u64,
    /// Generations that used retrieved context.
    pub hybrid: u64,
    /// Generations that lost their context to a retrieval failure.
    pub degraded: u64,
}

/// Nearest-rank latency percentiles over the most recent requests, in
/// milliseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyPercentiles {
    /// Number of samples in the window.
    pub samples: usize,
    /// Median.
    pub p50: u64,
    /// 90th percentile.
    pub p90: u64,
    /// 95th percentile.
    pub p95: u64,
    /// 99th percentile.
    pub p99: u64,
}

impl LatencyPercentiles {
    fn from_samples(mut samples: Vec<u64>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        samples.sort_unstable();
        let rank = |percent: usize| {
            let index = (percent * samples.len()).div_ceil(100).saturating_sub(1);
            samples[index.min(samples.len() - 1)]
        };
        Self {
            samples: samples.len(),
            p50: rank(50),
            p90: rank(90),
            p95: rank(95),
            p99: rank(99),
        }
    }
}

/// Serializable view of [`ServiceMetrics`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Request totals.
    pub request_counts: RequestCounts,
    /// Latency percentiles.
    pub latency_percentiles: LatencyPercentiles,
    /// Failures per error category.
    pub errors: BTreeMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_use_nearest_rank() {
        let samples = (1..=100).collect();
        let percentiles = LatencyPercentiles::from_samples(samples);
        assert_eq!(percentiles.samples, 100);
        assert_eq!(percentiles.p50, 50);
        assert_eq!(percentiles.p90, 90);
        assert_eq!(percentiles.p99, 99);

        let single = LatencyPercentiles::from_samples(vec![7]);
        assert_eq!((single.p50, single.p99), (7, 7));
        assert_eq!(LatencyPercentiles::from_samples(Vec::new()).samples, 0);
    }

    #[test]
    fn counts_requests_and_errors() {
        let metrics = ServiceMetrics::new();
        metrics.record_success(RequestKind::Execute, Duration::from_millis(12));
        metrics.record_hybrid();
        metrics.record_success(RequestKind::Query, Duration::from_millis(3));
        metrics.record_failure(RequestKind::Execute, "generation_failed", Duration::from_millis(40));
        metrics.record_failure(RequestKind::Execute, "generation_failed", Duration::from_millis(41));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.request_counts.execute, 3);
        assert_eq!(snapshot.request_counts.query, 1);
        assert_eq!(snapshot.request_counts.succeeded, 2);
        assert_eq!(snapshot.request_counts.failed, 2);
        assert_eq!(snapshot.request_counts.hybrid, 1);
        assert_eq!(snapshot.errors.get("generation_failed"), Some(&2));
        assert_eq!(snapshot.latency_percentiles.samples, 4);
        assert_eq!(snapshot.latency_percentiles.p99, 41);
    }

    #[test]
    fn latency_window_is_bounded() {
        let metrics = ServiceMetrics::default();
        for millis in 0..(LATENCY_WINDOW as u64 + 10) {
            metrics.record_success(RequestKind::Query, Duration::from_millis(millis));
        }
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.latency_percentiles.samples, LATENCY_WINDOW);
        assert_eq!(snapshot.request_counts.query, LATENCY_WINDOW as u64 + 10);
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let value = serde_json::to_value(ServiceMetrics::default().snapshot()).unwrap();
        assert!(value["requestCounts"]["memoryWrite"].is_u64());
        assert!(value["latencyPercentiles"]["p95"].is_u64());
    }
}
