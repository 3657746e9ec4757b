//! Error taxonomy shared by every subsystem.
//!
//! Reliability primitives convert protocol-level failures into this taxonomy
//! before anything above them sees the error. Workers and the HTTP edge only
//! ever match on these variants, never on `reqwest` or `sqlx` errors.

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Result type used across the core.
pub type CoreResult<T> = Result<T, CoreError>;

/// The error taxonomy of the core.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Caller-supplied data is malformed. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Local or provider token exhaustion; the caller's deadline was hit
    /// before a token became available.
    #[error("rate limited")]
    RateLimited {
        /// Hint for when a retry might succeed.
        retry_after: Option<Duration>,
    },

    /// Network failure, timeout at the remote, 408/425/429 or any 5xx.
    /// Retried inside the reliability layer.
    #[error("transient remote error{}: {detail}", status.map(|s| format!(" (http {s})")).unwrap_or_default())]
    TransientRemote {
        /// HTTP status, when the failure carried one.
        status: Option<u16>,
        /// Human-readable detail.
        detail: String,
    },

    /// A 4xx other than 408/425/429. Surfaced to the caller; not retried.
    #[error("permanent remote error (http {status}): {detail}")]
    PermanentRemote {
        /// HTTP status.
        status: u16,
        /// Human-readable detail.
        detail: String,
    },

    /// The circuit breaker rejected the call without attempting it.
    #[error("circuit breaker open for provider {provider}")]
    BreakerOpen {
        /// Provider whose breaker is open.
        provider: String,
    },

    /// A deadline elapsed. Semantically transient.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Unique-constraint or version conflict. The enrolment path treats this
    /// as success when the existing row matches the intended one.
    #[error("conflict with existing record")]
    Conflict {
        /// Id of the already-existing row, when known.
        existing: Option<Uuid>,
    },

    /// Persistence-layer failure during a batch write. Fatal to the batch,
    /// which is rolled back.
    #[error("data-loss hazard: {0}")]
    DataLossHazard(String),

    /// The entry point was called after shutdown began.
    #[error("shutdown in progress")]
    ShutdownInProgress,

    /// Storage error outside a batch write.
    #[error("storage error: {0}")]
    Storage(String),

    /// Secret resolution failure.
    #[error("secret error: {0}")]
    Secret(String),

    /// A referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl CoreError {
    /// Whether the reliability layer may retry this error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientRemote { .. } | Self::Timeout(_) | Self::RateLimited { .. }
        )
    }

    /// Classify an HTTP status into the taxonomy.
    #[must_use]
    pub fn from_status(status: u16, detail: impl Into<String>) -> Self {
        match status {
            408 | 425 | 429 => Self::TransientRemote {
                status: Some(status),
                detail: detail.into(),
            },
            500..=599 => Self::TransientRemote {
                status: Some(status),
                detail: detail.into(),
            },
            _ => Self::PermanentRemote {
                status,
                detail: detail.into(),
            },
        }
    }

    /// Shorthand for a validation failure.
    #[must_use]
    pub fn validation(detail: impl Into<String>) -> Self {
        Self::Validation(detail.into())
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::TransientRemote {
                status: None,
                detail: format!("request timed out: {err}"),
            };
        }
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), err.to_string());
        }
        Self::TransientRemote {
            status: None,
            detail: err.to_string(),
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                return Self::Conflict { existing: None };
            }
        }
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("invalid payload: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_statuses_are_retryable() {
        for status in [408, 425, 429, 500, 502, 503] {
            let err = CoreError::from_status(status, "boom");
            assert!(err.is_retryable(), "status {status} should be retryable");
        }
    }

    #[test]
    fn permanent_statuses_are_not_retryable() {
        for status in [400, 401, 403, 404, 409, 422] {
            let err = CoreError::from_status(status, "boom");
            assert!(!err.is_retryable(), "status {status} should be permanent");
            assert!(matches!(err, CoreError::PermanentRemote { .. }));
        }
    }

    #[test]
    fn breaker_open_is_not_auto_retryable() {
        let err = CoreError::BreakerOpen {
            provider: "lemlist".to_string(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn timeout_is_retryable() {
        assert!(CoreError::Timeout(Duration::from_secs(30)).is_retryable());
    }

    #[test]
    fn display_includes_status() {
        let err = CoreError::from_status(503, "service unavailable");
        assert!(err.to_string().contains("503"));
    }
}
