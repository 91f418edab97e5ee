pub mod openai;
pub mod retry;
pub mod tools;

use std::sync::Arc;

use cadence_core::config::CapabilityConfig;
use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::AgentCapability;

pub use openai::{render_instructions, OpenAiCapability};
pub use retry::RetryingCapability;
pub use tools::{ToolDefinition, ToolRegistry};

/// Build the configured agent capability, wrapped in retries.
pub fn create_capability(config: &CapabilityConfig) -> Result<Arc<dyn AgentCapability>> {
    let base: Arc<dyn AgentCapability> = match config.provider.as_str() {
        "openai" | "openai-compatible" | "ollama" | "groq" | "openrouter" => {
            Arc::new(OpenAiCapability::new(config.clone())?)
        }
        other => {
            return Err(CadenceError::Config(format!(
                "unsupported capability provider '{}'",
                other
            )))
        }
    };
    Ok(Arc::new(RetryingCapability::new(base, config.retry.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_is_a_config_error() {
        let config = CapabilityConfig {
            provider: "carrier-pigeon".into(),
            ..Default::default()
        };
        assert!(matches!(create_capability(&config), Err(CadenceError::Config(_))));
    }

    #[test]
    fn default_provider_builds() {
        assert!(create_capability(&CapabilityConfig::default()).is_ok());
    }
}
