//! Structured tracing helpers.

use anyhow::Context as _;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

/// Output format of the global subscriber.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Installs the global fmt subscriber.
///
/// `RUST_LOG` takes precedence over `default_filter`. Returns `false` when a
/// global subscriber was already installed, in which case nothing changes.
///
/// # Errors
///
/// Returns an error when neither `RUST_LOG` nor `default_filter` is a valid
/// filter directive.
pub fn init_tracing(format: LogFormat, default_filter: &str) -> anyhow::Result<bool> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)
            .with_context(|| format!("invalid log filter `{default_filter}`"))?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    let installed = match format {
        LogFormat::Text => builder.try_init().is_ok(),
        LogFormat::Json => builder.json().try_init().is_ok(),
    };
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_noop() {
        let first = init_tracing(LogFormat::Text, "info").unwrap();
        let second = init_tracing(LogFormat::Json, "debug").unwrap();
        assert!(!(first && second));
    }

    #[test]
    fn format_parses_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            format: LogFormat,
        }
        let parsed: Wrapper = serde_json::from_str(r#"{"format":"json"}"#).unwrap();
        assert_eq!(parsed.format, LogFormat::Json);
    }
}
