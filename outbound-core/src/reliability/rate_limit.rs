//! Per-provider token-bucket rate limiting.

use crate::error::{CoreError, CoreResult};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;

/// Token bucket with capacity and refill derived from a per-minute ceiling.
#[derive(Debug)]
pub struct ProviderRateLimiter {
    limiter: DefaultDirectRateLimiter,
    per_minute: u32,
}

impl ProviderRateLimiter {
    /// Create a bucket allowing `per_minute` requests per minute.
    #[must_use]
    pub fn new(per_minute: u32) -> Self {
        let ceiling = NonZeroU32::new(per_minute.max(1)).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::direct(Quota::per_minute(ceiling)),
            per_minute: per_minute.max(1),
        }
    }

    /// Configured ceiling.
    #[must_use]
    pub const fn per_minute(&self) -> u32 {
        self.per_minute
    }

    /// Acquire a token, waiting until one is available or the deadline is
    /// reached, whichever comes first.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RateLimited`] when the deadline elapses first.
    pub async fn acquire(&self, deadline: Duration) -> CoreResult<()> {
        tokio::time::timeout(deadline, self.limiter.until_ready())
            .await
            .map_err(|_| CoreError::RateLimited { retry_after: None })
    }

    /// Try to take a token without waiting.
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tokens_within_ceiling_are_immediate() {
        let limiter = ProviderRateLimiter::new(600);
        for _ in 0..5 {
            limiter
                .acquire(Duration::from_millis(50))
                .await
                .expect("token");
        }
    }

    #[tokio::test]
    async fn exhausted_bucket_hits_the_deadline() {
        let limiter = ProviderRateLimiter::new(1);
        limiter
            .acquire(Duration::from_millis(50))
            .await
            .expect("first token");
        let err = limiter.acquire(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, CoreError::RateLimited { .. }));
    }

    #[test]
    fn zero_ceiling_is_clamped() {
        let limiter = ProviderRateLimiter::new(0);
        assert_eq!(limiter.per_minute(), 1);
    }
}
