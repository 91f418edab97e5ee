use std::sync::Arc;

use cadence_core::config::GatewayConfig;
use cadence_scheduler::Guard;

/// Shared application state for axum handlers.
pub struct AppState {
    pub config: GatewayConfig,
    pub guard: Arc<Guard>,
}
