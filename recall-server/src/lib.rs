//! Thin HTTP surface over the recall context service.
//!
//! | Route | Purpose |
//! |---|---|
//! | `POST /context/execute` | context-augmented generation |
//! | `POST /context/query` | retrieval only |
//! | `GET /context/stats` | request counts, latency percentiles, memory stats |
//! | `POST /memory` | explicit memory write |
//! | `POST /memory/optimize` | on-demand compaction |
//! | `GET /health` | liveness |

#![warn(missing_docs, clippy::pedantic)]

pub mod bootstrap;
pub mod error;
pub mod metrics_sink;
pub mod routes;
pub mod state;

pub use bootstrap::{Services, build, build_with_oracle};
pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
