//! Per-provider circuit breaker.

use crate::config::BreakerSettings;
use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Breaker state, reported by health checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls flow through; outcomes feed the rolling window.
    Closed,
    /// Calls fast-fail with `BreakerOpen`.
    Open,
    /// One in-flight probe is admitted; its outcome decides the next state.
    HalfOpen,
}

impl BreakerState {
    /// Lowercase state name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    window: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Short-circuits calls to a failing provider.
///
/// Opens when the error rate over the rolling window exceeds the threshold
/// at minimum volume; after `reset_ms` a single half-open probe decides
/// whether to close again.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    #[must_use]
    pub fn new(name: &str, settings: BreakerSettings) -> Self {
        Self {
            name: name.to_string(),
            settings,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                window: VecDeque::new(),
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Admit or reject a call.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BreakerOpen`] while the breaker is open, or while
    /// a half-open probe is already in flight.
    pub fn try_acquire(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let reset = Duration::from_millis(self.settings.reset_ms);
                let elapsed = inner.opened_at.map_or(Duration::ZERO, |at| at.elapsed());
                if elapsed >= reset {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    info!(provider = %self.name, "circuit breaker half-open, admitting probe");
                    Ok(())
                } else {
                    Err(CoreError::BreakerOpen {
                        provider: self.name.clone(),
                    })
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(CoreError::BreakerOpen {
                        provider: self.name.clone(),
                    })
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Closed;
                inner.probe_in_flight = false;
                inner.opened_at = None;
                inner.window.clear();
                info!(provider = %self.name, "circuit breaker closed");
            }
            BreakerState::Closed => {
                Self::push_outcome(&mut inner, &self.settings, true);
            }
            BreakerState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_in_flight = false;
                warn!(provider = %self.name, "circuit breaker re-opened after failed probe");
            }
            BreakerState::Closed => {
                Self::push_outcome(&mut inner, &self.settings, false);
                if Self::should_open(&inner, &self.settings) {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    warn!(provider = %self.name, "circuit breaker opened");
                }
            }
            BreakerState::Open => {}
        }
    }

    fn push_outcome(inner: &mut Inner, settings: &BreakerSettings, success: bool) {
        let now = Instant::now();
        inner.window.push_back((now, success));
        let window = Duration::from_millis(settings.window_ms);
        while inner
            .window
            .front()
            .is_some_and(|(at, _)| now.duration_since(*at) > window)
        {
            inner.window.pop_front();
        }
    }

    fn should_open(inner: &Inner, settings: &BreakerSettings) -> bool {
        let volume = inner.window.len();
        if volume < settings.min_volume {
            return false;
        }
        let failures = inner.window.iter().filter(|(_, ok)| !ok).count();
        let error_pct = failures * 100 / volume;
        error_pct > usize::from(settings.error_threshold_pct)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_settings() -> BreakerSettings {
        BreakerSettings {
            error_threshold_pct: 50,
            reset_ms: 30_000,
            window_ms: 10_000,
            min_volume: 10,
        }
    }

    fn drive_failures(breaker: &CircuitBreaker, failures: usize, successes: usize) {
        for _ in 0..successes {
            breaker.try_acquire().expect("closed");
            breaker.record_success();
        }
        for _ in 0..failures {
            if breaker.try_acquire().is_ok() {
                breaker.record_failure();
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stays_closed_below_min_volume() {
        let breaker = CircuitBreaker::new("lemlist", fast_settings());
        drive_failures(&breaker, 5, 0);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn opens_at_error_rate_over_threshold() {
        let breaker = CircuitBreaker::new("lemlist", fast_settings());
        // 60% errors at volume 20.
        drive_failures(&breaker, 12, 8);
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(matches!(
            breaker.try_acquire(),
            Err(CoreError::BreakerOpen { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn probe_after_reset_closes_on_success() {
        let breaker = CircuitBreaker::new("lemlist", fast_settings());
        drive_failures(&breaker, 12, 8);
        assert_eq!(breaker.state(), BreakerState::Open);

        // Calls within the reset delay keep fast-failing.
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(breaker.try_acquire().is_err());

        // After the reset delay one probe is admitted.
        tokio::time::advance(Duration::from_secs(21)).await;
        breaker.try_acquire().expect("probe admitted");
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        // A second caller during the probe is rejected.
        assert!(breaker.try_acquire().is_err());

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.try_acquire().expect("closed again");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_reopens() {
        let breaker = CircuitBreaker::new("lemlist", fast_settings());
        drive_failures(&breaker, 12, 8);
        tokio::time::advance(Duration::from_secs(31)).await;
        breaker.try_acquire().expect("probe admitted");
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(breaker.try_acquire().is_err());
    }
}
