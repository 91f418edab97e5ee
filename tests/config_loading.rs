use std::io::Write;

use cadence_core::config::{AmbiguityPolicy, AppConfig, JobStoreKind};
use cadence_core::error::CadenceError;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[gateway]
bind = "0.0.0.0:9999"

[[gateway.api_keys]]
name = "web-ui"
key = "ck_web"
owner_id = "alice"

[[gateway.api_keys]]
name = "ops"
key = "ck_ops"
owner_id = "bob"

[engine]
ambiguity = "reject"

[capability]
provider = "openai-compatible"
base_url = "http://localhost:11434/v1"
default_model = "llama3.1"
timeout_secs = 30

[capability.retry]
max_retries = 5
initial_backoff_ms = 200

[scheduler]
store = "sqlite"
misfire_grace_secs = 120
system_job = false

[storage]
database = "/tmp/cadence-test.db"
"#;
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(toml_content.as_bytes()).unwrap();

    let config = AppConfig::load(tmp.path()).unwrap();

    let gw = config.gateway.unwrap();
    assert_eq!(gw.bind, "0.0.0.0:9999");
    assert_eq!(gw.api_keys.len(), 2);
    assert_eq!(gw.api_keys[1].owner_id, "bob");

    assert_eq!(config.engine.ambiguity, AmbiguityPolicy::Reject);

    assert_eq!(config.capability.provider, "openai-compatible");
    assert_eq!(config.capability.default_model, "llama3.1");
    assert_eq!(config.capability.timeout_secs, 30);
    assert_eq!(config.capability.retry.max_retries, 5);
    assert_eq!(config.capability.retry.initial_backoff_ms, 200);
    assert_eq!(config.capability.retry.max_backoff_ms, 30000);

    assert_eq!(config.scheduler.store, JobStoreKind::Sqlite);
    assert_eq!(config.scheduler.misfire_grace_secs, 120);
    assert!(!config.scheduler.system_job);
}

#[test]
fn test_env_var_expansion_in_file() {
    std::env::set_var("CADENCE_IT_API_KEY", "sk-from-env");
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(b"[capability]\napi_key = \"${CADENCE_IT_API_KEY}\"\n")
        .unwrap();

    let config = AppConfig::load(tmp.path()).unwrap();
    assert_eq!(config.capability.api_key.as_deref(), Some("sk-from-env"));
    std::env::remove_var("CADENCE_IT_API_KEY");
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");

    assert!(matches!(
        AppConfig::load(&path),
        Err(CadenceError::ConfigNotFound(_))
    ));
    let config = AppConfig::load_or_default(&path).unwrap();
    assert!(config.gateway.is_none());
    assert!(config.scheduler.system_job);
}

#[test]
fn test_malformed_file_is_a_config_error() {
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(b"[scheduler]\nstore = \"postgres\"\n").unwrap();

    assert!(matches!(
        AppConfig::load_or_default(tmp.path()),
        Err(CadenceError::Config(_))
    ));
}
