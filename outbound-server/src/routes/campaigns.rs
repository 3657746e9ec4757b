//! Campaign enrolment endpoint.

use super::AppState;
use crate::error::ApiError;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use outbound_core::jobs::{JobType, Priority};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

/// Body of `POST /campaigns/{id}/enrol`.
#[derive(Debug, Deserialize)]
pub struct EnrolBody {
    /// Contacts to enrol.
    pub contact_ids: Vec<Uuid>,
}

/// `POST /campaigns/{id}/enrol`: enrol contacts into a campaign.
///
/// Enrolment runs as a high-priority background job; the idempotency layer
/// makes repeated submissions safe.
pub async fn enrol(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<EnrolBody>,
) -> Result<impl IntoResponse, ApiError> {
    let params = json!({
        "campaign_id": id,
        "contact_ids": body.contact_ids,
    });
    let job_id = state
        .runtime
        .queue()
        .enqueue(JobType::Enrol, params, Priority::High)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "job_id": job_id }))))
}
