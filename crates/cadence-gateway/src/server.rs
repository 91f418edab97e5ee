use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use cadence_core::config::GatewayConfig;
use cadence_scheduler::Guard;

use crate::routes;
use crate::state::AppState;

/// HTTP gateway for runs, streamed runs and the job lifecycle.
pub struct GatewayServer {
    config: GatewayConfig,
    guard: Arc<Guard>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, guard: Arc<Guard>) -> Self {
        Self { config, guard }
    }

    pub fn router(&self) -> Router {
        build_router(Arc::new(AppState {
            config: self.config.clone(),
            guard: self.guard.clone(),
        }))
    }

    /// Run the gateway server until the cancellation token is triggered.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        if self.config.api_keys.is_empty() {
            tracing::warn!("No gateway api_keys configured; every authenticated route will return 401");
        }

        let app = self.router();
        let listener = TcpListener::bind(&self.config.bind).await?;
        info!(bind = %self.config.bind, "Gateway listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Gateway shut down");
        Ok(())
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(routes::health))
        // Runs
        .route("/api/run", post(routes::run))
        .route("/api/run/stream", post(routes::run_stream))
        .route("/api/run_stream", post(routes::run_stream))
        .route("/api/executions/{id}", get(routes::get_execution))
        // Jobs
        .route("/api/jobs", get(routes::list_jobs))
        .route("/api/jobs/all", get(routes::list_all_jobs))
        .route("/api/jobs/cron", post(routes::create_cron_job))
        .route("/api/jobs/interval", post(routes::create_interval_job))
        .route(
            "/api/jobs/{id}",
            get(routes::get_job).delete(routes::delete_job),
        )
        .route("/api/jobs/{id}/trigger", post(routes::trigger_job))
        .route("/api/jobs/{id}/pause", post(routes::pause_job))
        .route("/api/jobs/{id}/resume", post(routes::resume_job))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
