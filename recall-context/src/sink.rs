//! Observers notified once per generation request.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use recall_primitives::RequestId;
use tracing::{info, warn};

/// How a request ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The oracle answered.
    Completed {
        /// Whether retrieved context was part of the prompt.
        hybrid: bool,
        /// Number of context entries included in the prompt.
        context_entries: usize,
        /// Estimated prompt plus response tokens.
        total_tokens: usize,
        /// Retrieval was attempted but failed softly.
        degraded: bool,
    },
    /// The request failed.
    Failed {
        /// Stable error category, see [`ContextError::category`](crate::ContextError::category).
        category: &'static str,
        /// Rendered error.
        reason: String,
    },
}

/// Summary of one `execute` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionRecord {
    /// Request identifier.
    pub request_id: RequestId,
    /// Wall time spent on the request.
    pub elapsed: Duration,
    /// Final outcome.
    pub outcome: ExecutionOutcome,
}

impl ExecutionRecord {
    /// Returns `true` for completed requests.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.outcome, ExecutionOutcome::Completed { .. })
    }
}

/// Receives execution records (logging, metrics, tests). Implementations
/// must not block or panic.
pub trait ExecutionSink: Send + Sync {
    /// Records one finished request.
    fn record(&self, record: &ExecutionRecord);
}

/// Sink that logs to tracing.
#[derive(Debug, Default)]
pub struct TracingExecutionSink;

impl ExecutionSink for TracingExecutionSink {
    fn record(&self, record: &ExecutionRecord) {
        let elapsed_ms = record.elapsed.as_millis();
        match &record.outcome {
            ExecutionOutcome::Completed {
                hybrid,
                context_entries,
                total_tokens,
                degraded,
            } => info!(
                request_id = %record.request_id,
                elapsed_ms,
                hybrid,
                context_entries,
                total_tokens,
                degraded,
                "generation completed"
            ),
            ExecutionOutcome::Failed { category, reason } => warn!(
                request_id = %record.request_id,
                elapsed_ms,
                category,
                reason = %reason,
                "generation failed"
            ),
        }
    }
}

/// Fans a record out to several sinks.
#[derive(Default)]
pub struct CompositeSink {
    sinks: Vec<Arc<dyn ExecutionSink>>,
}

impl CompositeSink {
    /// Creates a composite from the supplied sinks.
    #[must_use]
    pub fn new<I>(sinks: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn ExecutionSink>>,
    {
        Self {
            sinks: sinks.into_iter().collect(),
        }
    }
}

impl ExecutionSink for CompositeSink {
    fn record(&self, record: &ExecutionRecord) {
        for sink in &self.sinks {
            sink.record(record);
        }
    }
}

/// Sink used during testing to capture records.
#[derive(Debug, Default)]
pub struct CollectingSink {
    records: Mutex<Vec<ExecutionRecord>>,
}

impl CollectingSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Removes and returns the collected records.
    #[must_use]
    pub fn drain(&self) -> Vec<ExecutionRecord> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.drain(..).collect()
    }
}

impl ExecutionSink for CollectingSink {
    fn record(&self, record: &ExecutionRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed() -> ExecutionRecord {
        ExecutionRecord {
            request_id: RequestId::random(),
            elapsed: Duration::from_millis(12),
            outcome: ExecutionOutcome::Failed {
                category: "generation_failed",
                reason: "boom".into(),
            },
        }
    }

    #[test]
    fn composite_fans_out() {
        let first = CollectingSink::new();
        let second = CollectingSink::new();
        let composite = CompositeSink::new([
            Arc::clone(&first) as Arc<dyn ExecutionSink>,
            Arc::clone(&second) as Arc<dyn ExecutionSink>,
            Arc::new(TracingExecutionSink) as Arc<dyn ExecutionSink>,
        ]);

        composite.record(&failed());

        assert_eq!(first.drain().len(), 1);
        let records = second.drain();
        assert_eq!(records.len(), 1);
        assert!(!records[0].is_success());
        assert!(second.drain().is_empty());
    }
}
