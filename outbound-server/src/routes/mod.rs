//! Router assembly and shared application state.

mod admin;
mod campaigns;
mod health;
mod jobs;
mod webhooks;

use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use outbound_core::runtime::CoreRuntime;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    /// The core runtime.
    pub runtime: Arc<CoreRuntime>,

    /// Prometheus render handle for `/metrics`.
    pub metrics: Option<PrometheusHandle>,
}

/// Build the full router.
///
/// `POST /jobs/{x}` enqueues by job type while `GET`/`DELETE /jobs/{x}`
/// address a job id; the segment is one route parameter and each handler
/// parses it for its own shape.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/jobs/{key}",
            post(jobs::enqueue).get(jobs::status).delete(jobs::cancel),
        )
        .route("/jobs", get(jobs::list))
        .route("/campaigns/{id}/enrol", post(campaigns::enrol))
        .route("/webhooks/{provider}", post(webhooks::ingest))
        .route("/admin/dlq", get(admin::list_dlq))
        .route("/admin/dlq/{id}/replay", post(admin::replay))
        .route("/admin/dlq/{id}/discard", post(admin::discard))
        .route("/metrics", get(health::metrics))
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
