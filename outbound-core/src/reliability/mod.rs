//! Reliability primitives for remote calls.
//!
//! All provider traffic funnels through [`Remote::call`]; nothing in the
//! core talks to a remote service directly. The circuit breaker is
//! outermost and scores the whole operation once; inside it the retry
//! loop acquires a fresh rate-limit token and runs under a fresh deadline
//! on every attempt, so timeout-class failures stay retryable.

mod breaker;
mod rate_limit;
mod retry;
mod timeout;

pub use breaker::{BreakerState, CircuitBreaker};
pub use rate_limit::ProviderRateLimiter;
pub use retry::RetryPolicy;
pub use timeout::with_timeout;

use crate::config::ProviderSettings;
use crate::error::CoreResult;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Reliability wrapper held by each provider adapter.
#[derive(Debug, Clone)]
pub struct Remote {
    provider: String,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<ProviderRateLimiter>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl Remote {
    /// Build the wrapper for one provider from configuration.
    #[must_use]
    pub fn new(provider: &str, settings: &ProviderSettings) -> Self {
        Self {
            provider: provider.to_string(),
            breaker: Arc::new(CircuitBreaker::new(provider, settings.breaker.clone())),
            limiter: Arc::new(ProviderRateLimiter::new(settings.rate_limit_per_minute)),
            timeout: Duration::from_millis(settings.timeout_ms),
            retry: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Provider name this wrapper guards.
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Current breaker state, for health reporting.
    #[must_use]
    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    /// Run one logical remote operation through the full stack.
    ///
    /// `f` is invoked once per attempt; each attempt acquires a rate-limit
    /// token and runs under the per-request deadline.
    ///
    /// # Errors
    ///
    /// Returns the taxonomy error from the innermost failure, or
    /// [`crate::error::CoreError::BreakerOpen`] without calling `f` at all.
    pub async fn call<T, F, Fut>(&self, operation: &str, f: F) -> CoreResult<T>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = CoreResult<T>> + Send,
        T: Send,
    {
        self.breaker.try_acquire()?;

        let result = self
            .retry
            .run(|| async {
                self.limiter.acquire(self.timeout).await?;
                with_timeout(self.timeout, f()).await
            })
            .await;

        match &result {
            Ok(_) => {
                self.breaker.record_success();
                metrics::counter!(
                    "provider_calls",
                    "provider" => self.provider.clone(),
                    "operation" => operation.to_string(),
                    "outcome" => "ok"
                )
                .increment(1);
            }
            Err(err) if err.is_retryable() => {
                self.breaker.record_failure();
                metrics::counter!(
                    "provider_calls",
                    "provider" => self.provider.clone(),
                    "operation" => operation.to_string(),
                    "outcome" => "error"
                )
                .increment(1);
            }
            Err(err) => {
                // The provider answered; a rejection is not a health signal.
                self.breaker.record_success();
                debug!(provider = %self.provider, operation, error = %err, "remote call rejected");
                metrics::counter!(
                    "provider_calls",
                    "provider" => self.provider.clone(),
                    "operation" => operation.to_string(),
                    "outcome" => "rejected"
                )
                .increment(1);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BreakerSettings;
    use crate::error::CoreError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn settings() -> ProviderSettings {
        ProviderSettings {
            rate_limit_per_minute: 6_000,
            breaker: BreakerSettings {
                error_threshold_pct: 50,
                reset_ms: 30_000,
                window_ms: 10_000,
                min_volume: 10,
            },
            ..ProviderSettings::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_429s_open_the_breaker_then_probe_recovers() {
        let remote = Remote::new("postmark", &settings()).with_retry(RetryPolicy::none());
        let calls = AtomicU32::new(0);

        // 60% of 20 calls fail with 429 over the window.
        for i in 0..20 {
            let fails = i % 5 < 3;
            let _ = remote
                .call("send", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if fails {
                        Err(CoreError::from_status(429, "slow down"))
                    } else {
                        Ok(())
                    }
                })
                .await;
        }
        assert_eq!(remote.breaker_state(), BreakerState::Open);

        // Fast-fail without reaching the provider.
        let before = calls.load(Ordering::SeqCst);
        let err = remote
            .call("send", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::BreakerOpen { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), before);

        // After the reset delay a successful probe closes the breaker.
        tokio::time::advance(Duration::from_secs(31)).await;
        remote
            .call("send", || async { Ok(()) })
            .await
            .expect("probe succeeds");
        assert_eq!(remote.breaker_state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn validation_errors_do_not_trip_the_breaker() {
        let remote = Remote::new("postmark", &settings()).with_retry(RetryPolicy::none());
        for _ in 0..30 {
            let result: CoreResult<()> = remote
                .call("send", || async {
                    Err(CoreError::validation("missing recipient"))
                })
                .await;
            assert!(result.is_err());
        }
        assert_eq!(remote.breaker_state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_happen_inside_one_breaker_outcome() {
        let remote = Remote::new("postmark", &settings());
        let calls = AtomicU32::new(0);
        let result = remote
            .call("send", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(CoreError::from_status(503, "blip"))
                } else {
                    Ok("pm-1")
                }
            })
            .await;
        assert_eq!(result.expect("recovers"), "pm-1");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // The blips never reached the breaker window as failures.
        assert_eq!(remote.breaker_state(), BreakerState::Closed);
    }
}
