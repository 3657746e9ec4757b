//! Mapping from the core error taxonomy to HTTP responses.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use outbound_core::error::CoreError;
use serde_json::json;

/// Error wrapper implementing the edge's status mapping.
#[derive(Debug)]
pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

/// Status code and retry hint for a core error.
#[must_use]
pub fn status_for(err: &CoreError) -> (StatusCode, Option<u64>) {
    match err {
        CoreError::Validation(_) => (StatusCode::BAD_REQUEST, None),
        CoreError::Conflict { .. } => (StatusCode::CONFLICT, None),
        CoreError::BreakerOpen { .. } => (StatusCode::SERVICE_UNAVAILABLE, Some(30)),
        CoreError::RateLimited { retry_after } => (
            StatusCode::TOO_MANY_REQUESTS,
            Some(retry_after.map_or(60, |d| d.as_secs().max(1))),
        ),
        CoreError::PermanentRemote { .. } => (StatusCode::BAD_GATEWAY, None),
        CoreError::TransientRemote { .. } | CoreError::Timeout(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, Some(10))
        }
        CoreError::NotFound(_) => (StatusCode::NOT_FOUND, None),
        CoreError::ShutdownInProgress => (StatusCode::SERVICE_UNAVAILABLE, None),
        CoreError::DataLossHazard(_) | CoreError::Storage(_) | CoreError::Secret(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, None)
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, retry_after) = status_for(&self.0);
        let body = match &self.0 {
            CoreError::Conflict { existing } => json!({
                "error": self.0.to_string(),
                "existing_id": existing,
            }),
            _ => json!({ "error": self.0.to_string() }),
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = secs.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn taxonomy_maps_to_the_contracted_status_codes() {
        let cases = [
            (CoreError::validation("bad"), StatusCode::BAD_REQUEST),
            (CoreError::Conflict { existing: None }, StatusCode::CONFLICT),
            (
                CoreError::BreakerOpen {
                    provider: "lemlist".to_string(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                CoreError::RateLimited { retry_after: None },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                CoreError::PermanentRemote {
                    status: 404,
                    detail: "gone".to_string(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                CoreError::from_status(503, "unavailable"),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                CoreError::Timeout(Duration::from_secs(30)),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                CoreError::NotFound("job".to_string()),
                StatusCode::NOT_FOUND,
            ),
            (
                CoreError::ShutdownInProgress,
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (err, expected) in cases {
            let (status, _) = status_for(&err);
            assert_eq!(status, expected, "for {err}");
        }
    }

    #[test]
    fn transient_errors_carry_retry_after() {
        let (_, retry) = status_for(&CoreError::from_status(503, "x"));
        assert_eq!(retry, Some(10));
        let (_, retry) = status_for(&CoreError::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
        });
        assert_eq!(retry, Some(7));
    }
}
