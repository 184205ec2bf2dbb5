//! Observability utilities for the recall service.

#![warn(missing_docs, clippy::pedantic)]

pub mod metrics;
pub mod tracing_support;

pub use metrics::{LatencyPercentiles, MetricsSnapshot, RequestCounts, RequestKind, ServiceMetrics};
pub use tracing_support::{LogFormat, init_tracing};
