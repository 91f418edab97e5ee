pub mod auth;
pub mod config;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use auth::{ensure_owner, Caller};
pub use config::AppConfig;
pub use error::{CadenceError, Result};
pub use event::EventBus;
pub use types::*;
