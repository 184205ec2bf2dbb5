//! Feeds coordinator execution records into [`ServiceMetrics`].

use std::sync::Arc;

use recall_context::{ExecutionOutcome, ExecutionRecord, ExecutionSink};
use recall_telemetry::{RequestKind, ServiceMetrics};

/// [`ExecutionSink`] that counts generations.
#[derive(Debug, Clone)]
pub struct MetricsSink {
    metrics: Arc<ServiceMetrics>,
}

impl MetricsSink {
    /// Wraps `metrics`.
    #[must_use]
    pub const fn new(metrics: Arc<ServiceMetrics>) -> Self {
        Self { metrics }
    }
}

impl ExecutionSink for MetricsSink {
    fn record(&self, record: &ExecutionRecord) {
        match &record.outcome {
            ExecutionOutcome::Completed {
                hybrid, degraded, ..
            } => {
                self.metrics.record_success(RequestKind::Execute, record.elapsed);
                if *hybrid {
                    self.metrics.record_hybrid();
                }
                if *degraded {
                    self.metrics.record_degraded();
                }
            }
            ExecutionOutcome::Failed { category, .. } => {
                self.metrics
                    .record_failure(RequestKind::Execute, category, record.elapsed);
            }
        }
    }
}
