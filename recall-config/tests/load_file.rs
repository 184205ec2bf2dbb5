use std::io::Write;
use std::time::Duration;

use tempfile::NamedTempFile;

use recall_config::{ConfigError, ENV_API_KEY, EmbeddingProvider, OracleProvider, Strategy, load};

const SAMPLE: &str = r#"
[server]
bind = "0.0.0.0:8088"
shutdown_grace_secs = 5

[logging]
filter = "info,recall_context=debug"
json = true

[store]
dimensions = 768
max_entries = 500
embedding_precision_bits = 16
ttl_secs = 86400

[store.time_decay]
half_life_days = 14.0
max_boost = 2.0

[retrieval]
strategy = "analytical"
threshold = 0.75

[generation]
default_model = "gpt-4o-mini"
write_back = true
oracle_timeout_ms = 30000

[oracle]
provider = "openai"
model = "gpt-4o-mini"

[embedding]
provider = "openai"
model = "text-embedding-3-small"

[compaction]
interval_secs = 0
"#;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .prefix("recall-config-")
        .suffix(".toml")
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn loads_file_and_env_key() {
    let file = write_config(SAMPLE);
    let config = load(Some(file.path()), |key| {
        (key == ENV_API_KEY).then(|| "sk-from-env".to_owned())
    })
    .unwrap();

    assert_eq!(config.server.bind_addr().unwrap().port(), 8088);
    assert_eq!(config.server.shutdown_grace(), Duration::from_secs(5));
    assert!(config.logging.json);
    assert_eq!(config.store.dimensions, 768);
    assert_eq!(config.store.embedding_precision_bits, 16);
    assert_eq!(config.store.ttl(), Some(Duration::from_secs(86_400)));
    assert!((config.store.time_decay.max_boost - 2.0).abs() < f64::EPSILON);
    assert_eq!(config.retrieval.strategy, Strategy::Analytical);
    assert_eq!(config.retrieval.limit, 5);
    assert_eq!(config.generation.oracle_timeout(), Duration::from_secs(30));
    assert_eq!(config.oracle.provider, OracleProvider::OpenAi);
    assert_eq!(config.embedding.provider, EmbeddingProvider::OpenAi);
    assert_eq!(config.compaction.interval(), None);
}

#[test]
fn openai_without_key_fails_validation() {
    let file = write_config(SAMPLE);
    let err = load(Some(file.path()), |_| None).unwrap_err();

    assert!(matches!(
        err,
        ConfigError::Invalid {
            field: "oracle.api_key",
            ..
        }
    ));
}
