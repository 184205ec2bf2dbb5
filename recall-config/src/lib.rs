//! Configuration for the recall service.
//!
//! Settings are read from an optional TOML file, overlaid with a handful of
//! environment variables and validated once. Libraries never read the
//! environment themselves; the server turns these settings into typed
//! library configuration.

#![warn(missing_docs, clippy::pedantic)]

mod error;

pub mod loader;
pub mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ENV_API_KEY, ENV_BIND, ENV_CONFIG, ENV_LOG, load};
pub use schema::{
    CompactionSettings, EmbeddingProvider, EmbeddingSettings, EvictionSettings,
    GenerationSettings, LoggingSettings, OracleProvider, OracleSettings, RetrievalSettings,
    ServerSettings, ServiceConfig, StoreSettings, Strategy, TimeDecaySettings,
};
