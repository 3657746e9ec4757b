//! Retry with exponential backoff and jitter.

use crate::error::CoreResult;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Backoff policy for retryable remote failures.
///
/// Defaults: base 1 s, doubling, 5 attempts, additive jitter up to 25 % of
/// the delay. The un-jittered delays for five attempts sum to 31 s.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the second attempt.
    pub base: Duration,

    /// Exponential multiplier between attempts.
    pub multiplier: u32,

    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,

    /// Uniform jitter as a fraction of the computed delay.
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            multiplier: 2,
            max_attempts: 5,
            jitter_fraction: 0.25,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries; used where the caller owns retry.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            base: Duration::from_secs(1),
            multiplier: 2,
            max_attempts: 1,
            jitter_fraction: 0.0,
        }
    }

    /// Un-jittered delay after the given failed attempt (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base
            .saturating_mul(self.multiplier.saturating_pow(exponent))
    }

    /// Delay with jitter applied.
    #[must_use]
    pub fn jittered_delay_for(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        if self.jitter_fraction <= 0.0 {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(0.0..=self.jitter_fraction);
        delay + delay.mul_f64(jitter)
    }

    /// Run `op`, retrying retryable errors per the policy.
    ///
    /// Non-retryable errors short-circuit immediately.
    ///
    /// # Errors
    ///
    /// Returns the last error once attempts are exhausted.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> CoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CoreResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.jittered_delay_for(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delays_double_per_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for(5), Duration::from_secs(16));
    }

    #[test]
    fn total_unjittered_wait_is_bounded() {
        let policy = RetryPolicy::default();
        let total: Duration = (1..=policy.max_attempts).map(|a| policy.delay_for(a)).sum();
        assert!(total <= Duration::from_secs(31));
    }

    #[test]
    fn jitter_stays_within_fraction() {
        let policy = RetryPolicy::default();
        for attempt in 1..=5 {
            let base = policy.delay_for(attempt);
            let jittered = policy.jittered_delay_for(attempt);
            assert!(jittered >= base);
            assert!(jittered <= base + base.mul_f64(policy.jitter_fraction));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_until_success() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let result = policy
            .run(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(CoreError::from_status(503, "unavailable"))
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result.expect("success"), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_do_not_retry() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let result: CoreResult<()> = policy
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CoreError::from_status(400, "bad request"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_return_last_error() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let result: CoreResult<()> = policy
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CoreError::from_status(503, "unavailable"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn delays_are_monotonically_non_decreasing(attempts in 1u32..12) {
            let policy = RetryPolicy::default();
            let mut last = Duration::ZERO;
            for attempt in 1..=attempts {
                let delay = policy.delay_for(attempt);
                prop_assert!(delay >= last);
                last = delay;
            }
        }
    }
}
