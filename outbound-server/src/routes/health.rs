//! Health and metrics endpoints.

use super::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use outbound_core::runtime::HealthStatus;
use serde_json::json;

/// `GET /health`: component map with a roll-up status.
///
/// A critical-component failure returns 503; a degraded service still
/// returns 200.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.runtime.health().await;
    let status = match report.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(report))
}

/// `GET /health/live`: process liveness.
pub async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// `GET /health/ready`: readiness; healthy or degraded serves traffic.
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.runtime.health().await;
    let status = match report.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(json!({ "status": report.status })))
}

/// `GET /metrics`: Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.as_ref().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "metrics recorder not installed".to_string(),
            )
        },
        |handle| (StatusCode::OK, handle.render()),
    )
}
