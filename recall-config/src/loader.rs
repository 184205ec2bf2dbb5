//! Configuration loader: file, then environment, then validation.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::schema::ServiceConfig;
use crate::{ConfigError, ConfigResult};

/// Path of the configuration file when no `--config` flag is given.
pub const ENV_CONFIG: &str = "RECALL_CONFIG";
/// Overrides `server.bind`.
pub const ENV_BIND: &str = "RECALL_BIND";
/// Overrides `logging.filter`.
pub const ENV_LOG: &str = "RECALL_LOG";
/// Overrides `oracle.api_key`.
pub const ENV_API_KEY: &str = "OPENAI_API_KEY";

/// Loads configuration from `path` (defaults when `None`), applies overrides
/// from `lookup` and validates the result.
///
/// `lookup` is normally `|key| std::env::var(key).ok()`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] or [`ConfigError::Parse`] for an unreadable
/// file and [`ConfigError::Invalid`] when validation fails.
pub fn load<F>(path: Option<&Path>, lookup: F) -> ConfigResult<ServiceConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(path) => {
            let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            debug!(path = %path.display(), "loaded config file");
            ServiceConfig::from_toml(&text)?
        }
        None => ServiceConfig::default(),
    };
    config.apply_env(lookup);
    config.validate()?;
    Ok(config)
}

impl ServiceConfig {
    /// Parses TOML without validating.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys.
    pub fn from_toml(text: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Overlays environment overrides. Blank values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(bind) = lookup(ENV_BIND) {
            self.server.bind = bind;
        }
        if let Some(filter) = lookup(ENV_LOG) {
            self.logging.filter = filter;
        }
        if let Some(key) = lookup(ENV_API_KEY) {
            self.oracle.api_key = Some(key);
        }
    }
}
