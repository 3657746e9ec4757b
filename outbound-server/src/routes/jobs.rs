//! Job queue endpoints.

use super::AppState;
use crate::error::ApiError;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use outbound_core::error::CoreError;
use outbound_core::jobs::{CancelOutcome, JobFilter, JobId, JobStatus, JobType, Priority};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

/// Body of `POST /jobs/{type}`.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EnqueueBody {
    /// Opaque job parameters, handed to the worker.
    pub params: serde_json::Value,

    /// Job priority.
    pub priority: Priority,
}

impl Default for EnqueueBody {
    fn default() -> Self {
        Self {
            params: serde_json::Value::Object(serde_json::Map::new()),
            priority: Priority::Normal,
        }
    }
}

/// `POST /jobs/{type}`: enqueue a job.
pub async fn enqueue(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<EnqueueBody>,
) -> Result<impl IntoResponse, ApiError> {
    let job_type: JobType = key.parse()?;
    let id = state
        .runtime
        .queue()
        .enqueue(job_type, body.params, body.priority)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "job_id": id }))))
}

fn parse_job_id(key: &str) -> Result<JobId, ApiError> {
    Uuid::parse_str(key)
        .map(JobId::from)
        .map_err(|_| ApiError(CoreError::validation(format!("invalid job id {key:?}"))))
}

/// `GET /jobs/{id}`: poll a job.
pub async fn status(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_job_id(&key)?;
    let job = state
        .runtime
        .queue()
        .status(id)
        .await?
        .ok_or_else(|| ApiError(CoreError::NotFound(format!("job {id}"))))?;
    Ok(Json(job))
}

/// `DELETE /jobs/{id}`: cancel a job.
pub async fn cancel(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_job_id(&key)?;
    let outcome = state.runtime.queue().cancel(id).await?;
    let (status, label) = match outcome {
        CancelOutcome::Cancelled => (StatusCode::OK, "cancelled"),
        CancelOutcome::Flagged => (StatusCode::ACCEPTED, "cancellation_requested"),
        CancelOutcome::AlreadyTerminal => (StatusCode::CONFLICT, "already_finished"),
        CancelOutcome::NotFound => {
            return Err(ApiError(CoreError::NotFound(format!("job {id}"))));
        }
    };
    Ok((status, Json(json!({ "status": label }))))
}

/// Query string of `GET /jobs`.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ListQuery {
    /// Restrict to one status.
    pub status: Option<JobStatus>,

    /// Restrict to one job type.
    pub job_type: Option<JobType>,

    /// Maximum rows.
    pub limit: Option<usize>,
}

/// `GET /jobs`: list jobs for the admin surface.
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = JobFilter {
        status: query.status,
        job_type: query.job_type,
        limit: query.limit,
    };
    let jobs = state.runtime.queue().list(&filter).await?;
    Ok(Json(json!({ "jobs": jobs })))
}
