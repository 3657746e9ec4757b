//! Per-lead rolling-window rate limiting.
//!
//! Process-local by design; the durable per-thread cap is the authoritative
//! limit. Entries are pruned by a periodic task owned by the responder so
//! the map cannot grow without bound.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Rolling window of response timestamps per lead.
#[derive(Debug)]
pub struct ResponderRateLimiter {
    max_per_window: u32,
    window: Duration,
    entries: Mutex<HashMap<String, Vec<Instant>>>,
}

impl ResponderRateLimiter {
    /// Create a limiter allowing `max_per_window` sends per `window` per
    /// lead.
    #[must_use]
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Whether another send for this lead fits the window.
    ///
    /// Does not record anything; call [`ResponderRateLimiter::record`] only
    /// after a successful send.
    #[must_use]
    pub fn would_allow(&self, lead: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let timestamps = entries.entry(lead.to_string()).or_default();
        timestamps.retain(|at| now.duration_since(*at) < self.window);
        (timestamps.len() as u32) < self.max_per_window
    }

    /// Record a successful send for this lead.
    pub fn record(&self, lead: &str) {
        self.entries
            .lock()
            .entry(lead.to_string())
            .or_default()
            .push(Instant::now());
    }

    /// Drop expired timestamps and empty leads; returns removed lead count.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, timestamps| {
            timestamps.retain(|at| now.duration_since(*at) < self.window);
            !timestamps.is_empty()
        });
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "pruned expired responder rate-limit entries");
        }
        removed
    }

    /// Number of leads currently tracked.
    #[must_use]
    pub fn tracked_leads(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn allows_up_to_the_ceiling() {
        let limiter = ResponderRateLimiter::new(2, Duration::from_secs(3600));
        assert!(limiter.would_allow("a@b.c"));
        limiter.record("a@b.c");
        assert!(limiter.would_allow("a@b.c"));
        limiter.record("a@b.c");
        assert!(!limiter.would_allow("a@b.c"));
    }

    #[tokio::test(start_paused = true)]
    async fn leads_are_limited_independently() {
        let limiter = ResponderRateLimiter::new(1, Duration::from_secs(3600));
        limiter.record("a@b.c");
        assert!(!limiter.would_allow("a@b.c"));
        assert!(limiter.would_allow("x@y.z"));
    }

    #[tokio::test(start_paused = true)]
    async fn window_expiry_frees_capacity() {
        let limiter = ResponderRateLimiter::new(1, Duration::from_secs(3600));
        limiter.record("a@b.c");
        assert!(!limiter.would_allow("a@b.c"));

        tokio::time::advance(Duration::from_secs(3601)).await;
        assert!(limiter.would_allow("a@b.c"));
    }

    #[tokio::test(start_paused = true)]
    async fn prune_drops_expired_leads() {
        let limiter = ResponderRateLimiter::new(5, Duration::from_secs(3600));
        limiter.record("a@b.c");
        limiter.record("x@y.z");
        assert_eq!(limiter.tracked_leads(), 2);

        tokio::time::advance(Duration::from_secs(3601)).await;
        let removed = limiter.prune();
        assert_eq!(removed, 2);
        assert_eq!(limiter.tracked_leads(), 0);
    }
}
