use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CadenceError, Result};

/// Top-level Cadence configuration (`cadence.toml`). Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub gateway: Option<GatewayConfig>,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub capability: CapabilityConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

// ── Gateway ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub api_keys: Vec<ApiKeyConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            api_keys: vec![],
        }
    }
}

/// Maps a bearer key to the owner identity it authenticates as.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    pub name: String,
    pub key: String,
    pub owner_id: String,
}

fn default_bind() -> String { "127.0.0.1:8700".to_string() }

// ── Engine ──────────────────────────────────────────────────────

/// What the graph resolver does with several entry candidates or fan-out.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityPolicy {
    /// Pick the first candidate in insertion order and log a warning.
    #[default]
    FirstMatch,
    /// Fail resolution.
    Reject,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub ambiguity: AmbiguityPolicy,
}

// ── Capability ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Used when an agent row leaves its model empty.
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: f32,
    /// HTTP client timeout; 0 disables it.
    #[serde(default)]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: None,
            api_key: None,
            default_model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: 0.0,
            timeout_secs: 0,
            retry: RetryConfig::default(),
        }
    }
}

fn default_provider() -> String { "openai".to_string() }
fn default_model() -> String { "gpt-4o".to_string() }
fn default_max_tokens() -> u32 { 4096 }

/// Retry configuration for agent invocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

// ── Scheduler ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStoreKind {
    /// Jobs vanish on restart (except the system job).
    #[default]
    Memory,
    /// Jobs persist in the storage database.
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub store: JobStoreKind,
    /// A fire later than this past its due time is skipped.
    #[serde(default = "default_misfire_grace")]
    pub misfire_grace_secs: u64,
    /// Install the built-in system job at startup.
    #[serde(default = "default_system_job")]
    pub system_job: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            store: JobStoreKind::default(),
            misfire_grace_secs: default_misfire_grace(),
            system_job: default_system_job(),
        }
    }
}

fn default_misfire_grace() -> u64 { 3600 }
fn default_system_job() -> bool { true }

// ── Storage ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database")]
    pub database: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
        }
    }
}

fn default_database() -> String { "~/.cadence/cadence.db".to_string() }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| CadenceError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded)
            .map_err(|e| CadenceError::Config(e.to_string()))
    }

    /// Like `load`, but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(CadenceError::ConfigNotFound(_)) => Ok(Self::default()),
            other => other,
        }
    }

    /// Resolve the database path (expand ~).
    pub fn database_path(&self) -> PathBuf {
        let db = &self.storage.database;
        if let Some(rest) = db.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return home.join(rest);
            }
        }
        PathBuf::from(db)
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_CADENCE_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_CADENCE_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_CADENCE_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_CADENCE_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_CADENCE_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert!(config.gateway.is_none());
        assert_eq!(config.engine.ambiguity, AmbiguityPolicy::FirstMatch);
        assert_eq!(config.scheduler.store, JobStoreKind::Memory);
        assert_eq!(config.scheduler.misfire_grace_secs, 3600);
        assert!(config.scheduler.system_job);
        assert_eq!(config.capability.retry.max_retries, 3);
        assert_eq!(config.capability.default_model, "gpt-4o");
    }

    #[test]
    fn test_sections_parse() {
        let toml_str = r#"
[gateway]
bind = "0.0.0.0:9000"

[[gateway.api_keys]]
name = "web-ui"
key = "ck_abc"
owner_id = "user-1"

[engine]
ambiguity = "reject"

[scheduler]
store = "sqlite"
misfire_grace_secs = 60
system_job = false
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        let gw = config.gateway.unwrap();
        assert_eq!(gw.bind, "0.0.0.0:9000");
        assert_eq!(gw.api_keys[0].owner_id, "user-1");
        assert_eq!(config.engine.ambiguity, AmbiguityPolicy::Reject);
        assert_eq!(config.scheduler.store, JobStoreKind::Sqlite);
        assert!(!config.scheduler.system_job);
    }

    #[test]
    fn test_database_path_expands_home() {
        std::env::set_var("HOME", "/home/tester");
        let config = AppConfig::default();
        assert_eq!(
            config.database_path(),
            PathBuf::from("/home/tester/.cadence/cadence.db")
        );
    }
}
