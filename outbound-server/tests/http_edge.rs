//! End-to-end tests of the HTTP edge over the in-memory runtime.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use outbound_core::config::OutboundConfig;
use outbound_core::providers::webhook::sign_body;
use outbound_core::runtime::CoreRuntime;
use outbound_server::routes::{router, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Build a router over a fresh in-memory runtime.
async fn edge(start: bool) -> (Router, Arc<CoreRuntime>) {
    let mut config = OutboundConfig::default();
    config.queue.workers = 2;
    config.queue.poll_interval_ms = 10;
    let runtime = Arc::new(CoreRuntime::build(config).await.expect("runtime"));
    if start {
        runtime.start();
    }
    let state = AppState {
        runtime: Arc::clone(&runtime),
        metrics: None,
    };
    (router(state), runtime)
}

async fn read_json(response: axum::response::Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

async fn send(router: &Router, request: Request<Body>) -> axum::response::Response {
    router.clone().oneshot(request).await.expect("response")
}

#[tokio::test]
async fn health_reports_healthy_on_memory_stores() {
    let (router, _runtime) = edge(false).await;
    let response = send(
        &router,
        Request::get("/health").body(Body::empty()).expect("request"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert!(body["components"]["database"]["healthy"]
        .as_bool()
        .expect("flag"));
}

#[tokio::test]
async fn liveness_is_always_ok() {
    let (router, _runtime) = edge(false).await;
    let response = send(
        &router,
        Request::get("/health/live")
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn jobs_enqueue_poll_and_complete() {
    let (router, runtime) = edge(true).await;

    let request = Request::post("/jobs/import")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({
                "params": { "contacts": [{ "email": "alice@example.com" }] },
                "priority": "high",
            })
            .to_string(),
        ))
        .expect("request");
    let response = send(&router, request).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = read_json(response).await;
    let job_id = body["job_id"].as_str().expect("job id").to_string();

    for _ in 0..200 {
        let response = send(
            &router,
            Request::get(format!("/jobs/{job_id}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let job = read_json(response).await;
        if job["status"] == "completed" {
            assert_eq!(job["result"]["inserted"], 1);
            runtime.shutdown().await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job never completed");
}

#[tokio::test]
async fn cancelling_an_unknown_job_is_not_found() {
    let (router, _runtime) = edge(false).await;
    let response = send(
        &router,
        Request::delete(format!("/jobs/{}", uuid::Uuid::new_v4()))
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_job_type_is_a_bad_request() {
    let (router, _runtime) = edge(false).await;
    let response = send(
        &router,
        Request::post("/jobs/definitely-not-a-type")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .expect("request"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn enrol_endpoint_schedules_a_high_priority_job() {
    let (router, _runtime) = edge(false).await;
    let response = send(
        &router,
        Request::post(format!("/campaigns/{}/enrol", uuid::Uuid::new_v4()))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "contact_ids": [uuid::Uuid::new_v4()] }).to_string(),
            ))
            .expect("request"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = read_json(response).await;
    assert!(body["job_id"].is_string());
}

#[tokio::test]
async fn unknown_webhook_provider_is_not_found() {
    let (router, _runtime) = edge(false).await;
    let response = send(
        &router,
        Request::post("/webhooks/nope")
            .body(Body::from("{}"))
            .expect("request"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn postmark_event_without_enrolment_is_orphaned() {
    let (router, _runtime) = edge(false).await;
    let payload = json!({
        "RecordType": "Open",
        "MessageID": "pm-edge-1",
        "Recipient": "ghost@example.com",
    });
    let response = send(
        &router,
        Request::post("/webhooks/postmark")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload.to_string()))
            .expect("request"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = read_json(response).await;
    assert_eq!(body["outcome"], "orphaned");
}

#[tokio::test]
async fn malformed_webhook_payload_is_a_bad_request() {
    let (router, _runtime) = edge(false).await;
    let response = send(
        &router,
        Request::post("/webhooks/postmark")
            .body(Body::from("not json"))
            .expect("request"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn signed_lemlist_webhooks_require_a_valid_signature() {
    // The env-backend secret store picks this up when the runtime builds.
    std::env::set_var("OUTBOUND_SECRET_WEBHOOK_SECRET_LEMLIST", "edge-secret");
    let (router, runtime) = edge(false).await;
    std::env::remove_var("OUTBOUND_SECRET_WEBHOOK_SECRET_LEMLIST");

    let payload = json!({
        "_id": "evt-edge",
        "type": "emailsOpened",
        "leadEmail": "ghost@example.com",
    })
    .to_string();

    // Missing signature: rejected, nothing enqueued.
    let response = send(
        &router,
        Request::post("/webhooks/lemlist")
            .body(Body::from(payload.clone()))
            .expect("request"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(runtime.orphaned().gauges().await.expect("gauges").size, 0);

    // Valid signature: accepted and buffered for retry.
    let signature = sign_body("edge-secret", payload.as_bytes());
    let response = send(
        &router,
        Request::post("/webhooks/lemlist")
            .header("x-lemlist-signature", signature)
            .body(Body::from(payload))
            .expect("request"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(runtime.orphaned().gauges().await.expect("gauges").size, 1);
}

#[tokio::test]
async fn dlq_listing_starts_empty() {
    let (router, _runtime) = edge(false).await;
    let response = send(
        &router,
        Request::get("/admin/dlq")
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["entries"], json!([]));
}
