use thiserror::Error;

#[derive(Debug, Error)]
pub enum CadenceError {
    // Request errors
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Deliberately carries no detail about the resource or its owner.
    #[error("Not permitted")]
    Forbidden,

    #[error("Missing caller identity")]
    Unauthenticated,

    // Engine errors
    #[error("Graph resolution failed: {0}")]
    Resolution(String),

    #[error("Agent invocation failed: {agent}: {message}")]
    Capability { agent: String, message: String },

    #[error("Run cancelled: {0}")]
    Cancelled(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CadenceError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn capability(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Capability {
            agent: agent.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CadenceError>;
