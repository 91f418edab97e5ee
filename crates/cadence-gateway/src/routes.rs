use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use cadence_core::types::{ExecutionId, ScheduleSpec};
use cadence_engine::stream::{ndjson_frames, CONTENT_TYPE};
use cadence_engine::RunRequest;
use cadence_scheduler::JobSpec;

use crate::error::ApiError;
use crate::middleware::Authenticated;
use crate::state::AppState;

type ApiResult<T> = Result<T, ApiError>;

// GET /api/health (no auth)
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ── Runs ────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct RunBody {
    pub workflow_id: String,
    #[serde(alias = "user_id")]
    pub owner_id: String,
    pub input: String,
}

impl From<RunBody> for RunRequest {
    fn from(body: RunBody) -> Self {
        RunRequest {
            workflow_id: body.workflow_id,
            owner_id: body.owner_id,
            input: body.input,
        }
    }
}

// POST /api/run: terminal result only
pub async fn run(
    Authenticated(caller): Authenticated,
    State(state): State<Arc<AppState>>,
    Json(body): Json<RunBody>,
) -> ApiResult<Json<Value>> {
    let result = state.guard.run(&caller, body.into()).await?;
    Ok(Json(json!(result)))
}

// POST /api/run/stream: one JSON event per line as the run progresses
pub async fn run_stream(
    Authenticated(caller): Authenticated,
    State(state): State<Arc<AppState>>,
    Json(body): Json<RunBody>,
) -> ApiResult<Response> {
    let rx = state.guard.run_streamed(&caller, body.into()).await?;
    Ok((
        [
            (header::CONTENT_TYPE, CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(ndjson_frames(rx)),
    )
        .into_response())
}

// GET /api/executions/{id}
pub async fn get_execution(
    Authenticated(caller): Authenticated,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let execution = state
        .guard
        .get_execution(&caller, &ExecutionId::from_string(&id))
        .await?;
    Ok(Json(json!(execution)))
}

// ── Jobs ────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CronJobBody {
    pub job_id: String,
    pub workflow_id: String,
    #[serde(alias = "user_id")]
    pub owner_id: String,
    #[serde(default)]
    pub input: String,
    #[serde(alias = "cron", alias = "expression")]
    pub cron_expression: String,
}

#[derive(Deserialize)]
pub struct IntervalJobBody {
    pub job_id: String,
    pub workflow_id: String,
    #[serde(alias = "user_id")]
    pub owner_id: String,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub hours: u32,
    #[serde(default)]
    pub minutes: u32,
    #[serde(default)]
    pub seconds: u32,
}

// POST /api/jobs/cron
pub async fn create_cron_job(
    Authenticated(caller): Authenticated,
    State(state): State<Arc<AppState>>,
    Json(body): Json<CronJobBody>,
) -> ApiResult<Json<Value>> {
    let spec = JobSpec {
        job_id: body.job_id,
        workflow_id: body.workflow_id,
        owner_id: body.owner_id,
        input: body.input,
        schedule: ScheduleSpec::Cron {
            expression: body.cron_expression,
        },
    };
    let view = state.guard.register_job(&caller, spec).await?;
    Ok(Json(json!({ "status": "scheduled", "job": view })))
}

// POST /api/jobs/interval
pub async fn create_interval_job(
    Authenticated(caller): Authenticated,
    State(state): State<Arc<AppState>>,
    Json(body): Json<IntervalJobBody>,
) -> ApiResult<Json<Value>> {
    let spec = JobSpec {
        job_id: body.job_id,
        workflow_id: body.workflow_id,
        owner_id: body.owner_id,
        input: body.input,
        schedule: ScheduleSpec::Interval {
            hours: body.hours,
            minutes: body.minutes,
            seconds: body.seconds,
        },
    };
    let view = state.guard.register_job(&caller, spec).await?;
    Ok(Json(json!({ "status": "scheduled", "job": view })))
}

// GET /api/jobs: the caller's jobs
pub async fn list_jobs(
    Authenticated(caller): Authenticated,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Value>> {
    let jobs = state.guard.list_jobs(&caller)?;
    Ok(Json(json!({ "jobs": jobs })))
}

// GET /api/jobs/all: every owner's jobs, unfiltered
pub async fn list_all_jobs(
    Authenticated(caller): Authenticated,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Value>> {
    info!(caller = %caller.id, "Unfiltered job listing requested");
    let jobs = state.guard.list_all_jobs()?;
    Ok(Json(json!({ "jobs": jobs })))
}

// GET /api/jobs/{id}
pub async fn get_job(
    Authenticated(caller): Authenticated,
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let view = state.guard.get_job(&caller, &job_id)?;
    Ok(Json(json!(view)))
}

// POST /api/jobs/{id}/trigger
pub async fn trigger_job(
    Authenticated(caller): Authenticated,
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Value>> {
    // The run continues detached from this request.
    let _run = state.guard.trigger_job(&caller, &job_id).await?;
    Ok(Json(json!({ "status": "triggered", "job_id": job_id })))
}

// POST /api/jobs/{id}/pause
pub async fn pause_job(
    Authenticated(caller): Authenticated,
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let view = state.guard.pause_job(&caller, &job_id).await?;
    Ok(Json(json!({ "status": "paused", "job": view })))
}

// POST /api/jobs/{id}/resume
pub async fn resume_job(
    Authenticated(caller): Authenticated,
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let view = state.guard.resume_job(&caller, &job_id).await?;
    Ok(Json(json!({ "status": "resumed", "job": view })))
}

// DELETE /api/jobs/{id}
pub async fn delete_job(
    Authenticated(caller): Authenticated,
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.guard.delete_job(&caller, &job_id).await?;
    Ok(Json(json!({ "status": "deleted", "job_id": job_id })))
}
