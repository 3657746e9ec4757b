//! Dead-letter queue admin endpoints.

use super::AppState;
use crate::error::ApiError;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use outbound_core::orphaned::DlqStatus;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

/// Query string of `GET /admin/dlq`.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct DlqQuery {
    /// Maximum entries returned.
    pub limit: Option<usize>,

    /// Pagination offset.
    pub offset: Option<usize>,

    /// Restrict to one status (`failed`, `replayed`, `discarded`).
    pub status: Option<DlqStatus>,
}

/// `GET /admin/dlq`: list dead-letter entries.
pub async fn list_dlq(
    State(state): State<AppState>,
    Query(query): Query<DlqQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let entries = state
        .runtime
        .dlq()
        .list(
            query.limit.unwrap_or(50),
            query.offset.unwrap_or(0),
            query.status,
        )
        .await?;
    Ok(Json(json!({ "entries": entries })))
}

/// `POST /admin/dlq/{id}/replay`: re-enqueue an entry into the orphaned
/// queue with its attempts reset.
pub async fn replay(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.runtime.dlq().replay(id).await?;
    Ok(Json(json!({ "status": "replayed" })))
}

/// `POST /admin/dlq/{id}/discard`: mark an entry discarded.
pub async fn discard(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.runtime.dlq().discard(id).await?;
    Ok(Json(json!({ "status": "discarded" })))
}
