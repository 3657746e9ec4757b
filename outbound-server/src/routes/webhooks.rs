//! Webhook intake.

use super::AppState;
use crate::error::ApiError;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use outbound_core::error::CoreError;
use outbound_core::workers::IngestOutcome;
use serde_json::json;
use std::collections::HashMap;
use tracing::warn;

fn header_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect()
}

/// `POST /webhooks/{provider}`: verify, normalise and ingest an event.
///
/// A missing or invalid signature is rejected with 401 and nothing is
/// enqueued.
pub async fn ingest(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let handler = state
        .runtime
        .webhooks()
        .get(&provider)
        .ok_or_else(|| ApiError(CoreError::NotFound(format!("provider {provider}"))))?
        .clone();

    if let Err(err) = handler.verify(&body, &header_map(&headers)) {
        warn!(provider = %provider, error = %err, "webhook rejected");
        return Ok((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid webhook signature" })),
        ));
    }

    let event = handler.parse(&body)?;
    let outcome = state.runtime.ingest_event(&event).await?;
    let label = match outcome {
        IngestOutcome::Resolved => "resolved",
        IngestOutcome::Orphaned => "orphaned",
    };
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "event_id": event.id, "outcome": label })),
    ))
}
