//! The orphaned-event retry queue.

use super::store::{DeadLetterEvent, DeadLetterStore, DlqStatus, OrphanedEvent, OrphanedEventStore};
use crate::config::OrphanedSettings;
use crate::error::CoreResult;
use crate::model::NormalizedEvent;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Maximum uniform jitter added to each retry delay.
const RETRY_JITTER_MS: u64 = 1_000;

/// Age past which a queued event counts as stale in the gauges.
const STALE_AFTER: Duration = Duration::from_secs(3_600);

/// What the resolver did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The enrolment was found and the outcome committed.
    Handled,
    /// The enrolment is still not visible.
    NotFound,
}

/// Resolves a buffered event against the enrolment tables.
///
/// Implementations must commit their outcome mutation before returning
/// [`Resolution::Handled`]; the queue removes the event only afterwards.
#[async_trait]
pub trait EventResolver: Send + Sync {
    /// Attempt to resolve one event.
    async fn resolve(&self, event: &NormalizedEvent) -> CoreResult<Resolution>;
}

/// Statistics from one processing cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// The cycle was skipped because the previous one is still running.
    pub skipped: bool,
    /// Events resolved and removed.
    pub succeeded: usize,
    /// Events that failed this attempt.
    pub failed: usize,
    /// Events promoted to the dead-letter queue.
    pub moved_to_dlq: usize,
}

/// Point-in-time gauges.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueGauges {
    /// Events in the queue.
    pub size: usize,
    /// Events ready for retry now.
    pub ready_for_retry: usize,
    /// Whether a processing cycle is in flight.
    pub processing: bool,
    /// Events queued more than an hour ago.
    pub stale: usize,
}

/// Bounded retry queue for webhook events that arrived before their
/// enrolment.
#[derive(Clone)]
pub struct OrphanedEventQueue {
    store: Arc<dyn OrphanedEventStore>,
    dlq: Arc<dyn DeadLetterStore>,
    settings: OrphanedSettings,
    processing: Arc<AtomicBool>,
}

impl OrphanedEventQueue {
    /// Build the queue over its stores.
    #[must_use]
    pub fn new(
        store: Arc<dyn OrphanedEventStore>,
        dlq: Arc<dyn DeadLetterStore>,
        settings: OrphanedSettings,
    ) -> Self {
        Self {
            store,
            dlq,
            settings,
            processing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The dead-letter store, shared with the admin surface.
    #[must_use]
    pub fn dlq_store(&self) -> Arc<dyn DeadLetterStore> {
        Arc::clone(&self.dlq)
    }

    /// Delay before attempt `attempt` (1-based), without jitter.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let index = usize::try_from(attempt.saturating_sub(1)).unwrap_or(usize::MAX);
        let secs = self
            .settings
            .retry_delays_secs
            .get(index)
            .or_else(|| self.settings.retry_delays_secs.last())
            .copied()
            .unwrap_or(60);
        Duration::from_secs(secs)
    }

    fn jittered(delay: Duration) -> Duration {
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..=RETRY_JITTER_MS))
    }

    /// Buffer an event until its enrolment becomes visible.
    ///
    /// At capacity, the oldest entry is evicted and counted as dropped.
    pub async fn enqueue(&self, event: NormalizedEvent) -> CoreResult<()> {
        let now = Utc::now();
        let first_delay = Self::jittered(self.delay_for_attempt(1));
        let entry = OrphanedEvent {
            event,
            attempts: 0,
            next_retry_at: now
                + ChronoDuration::from_std(first_delay).unwrap_or(ChronoDuration::seconds(5)),
            queued_at: now,
            first_attempted_at: None,
            last_attempted_at: None,
        };

        let evicted = self
            .store
            .insert_bounded(&entry, self.settings.max_size)
            .await?;
        metrics::counter!("orphaned_events_enqueued").increment(1);
        if let Some(evicted_id) = evicted {
            warn!(evicted = %evicted_id, "orphaned queue at capacity, dropped oldest event");
            metrics::counter!("orphaned_events_dropped_at_capacity").increment(1);
        }
        debug!(event_id = %entry.event.id, "orphaned event buffered");
        self.publish_gauges().await;
        Ok(())
    }

    /// Run one retry cycle over up to `batch_size` ready events.
    ///
    /// A cycle that finds the previous one still running does not silently
    /// skip: it logs a lag warning and counts the skip.
    pub async fn process_cycle(&self, resolver: &dyn EventResolver) -> CoreResult<CycleStats> {
        if self.processing.swap(true, Ordering::SeqCst) {
            warn!("PROCESSING_LAG: previous orphaned-event cycle still running");
            metrics::counter!("orphaned_cycles_skipped").increment(1);
            return Ok(CycleStats {
                skipped: true,
                ..CycleStats::default()
            });
        }

        let result = self.run_cycle(resolver).await;
        self.processing.store(false, Ordering::SeqCst);
        self.publish_gauges().await;
        result
    }

    async fn run_cycle(&self, resolver: &dyn EventResolver) -> CoreResult<CycleStats> {
        let now = Utc::now();
        let batch = self.store.ready(now, self.settings.batch_size).await?;
        let mut stats = CycleStats::default();

        for entry in batch {
            match resolver.resolve(&entry.event).await {
                Ok(Resolution::Handled) => {
                    // The resolver committed the outcome first; only now is
                    // the event safe to drop.
                    self.store.remove(entry.event.id).await?;
                    stats.succeeded += 1;
                    metrics::counter!("orphaned_events_succeeded").increment(1);
                }
                Ok(Resolution::NotFound) => {
                    self.handle_failure(&entry, "enrolment not found", &mut stats)
                        .await?;
                }
                Err(err) => {
                    self.handle_failure(&entry, &err.to_string(), &mut stats)
                        .await?;
                }
            }
        }
        Ok(stats)
    }

    async fn handle_failure(
        &self,
        entry: &OrphanedEvent,
        reason: &str,
        stats: &mut CycleStats,
    ) -> CoreResult<()> {
        let now = Utc::now();
        let attempts = entry.attempts + 1;
        stats.failed += 1;
        metrics::counter!("orphaned_events_failed").increment(1);

        if attempts >= self.settings.max_attempts {
            let dead = DeadLetterEvent {
                id: entry.event.id,
                event: entry.event.clone(),
                attempts,
                failure_reason: reason.to_string(),
                first_attempted_at: entry.first_attempted_at.or(Some(now)),
                last_attempted_at: Some(now),
                status: DlqStatus::Failed,
                created_at: now,
            };
            self.dlq.insert(&dead).await?;
            self.store.remove(entry.event.id).await?;
            stats.moved_to_dlq += 1;
            metrics::counter!("orphaned_events_moved_to_dlq").increment(1);
            warn!(
                event_id = %entry.event.id,
                attempts,
                reason,
                "orphaned event promoted to the dead-letter queue"
            );
        } else {
            let next = Self::jittered(self.delay_for_attempt(attempts + 1));
            self.store
                .reschedule(
                    entry.event.id,
                    attempts,
                    now + ChronoDuration::from_std(next).unwrap_or(ChronoDuration::seconds(60)),
                    now,
                )
                .await?;
            debug!(event_id = %entry.event.id, attempts, "orphaned event rescheduled");
        }
        Ok(())
    }

    /// Process ready events until the queue is empty of ready work or
    /// `max_drain` elapses. Returns the number of events remaining.
    pub async fn drain(
        &self,
        resolver: &dyn EventResolver,
        max_drain: Duration,
    ) -> CoreResult<usize> {
        let deadline = tokio::time::Instant::now() + max_drain;
        loop {
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            let ready = self.store.ready_count(Utc::now()).await?;
            if ready == 0 {
                break;
            }
            let stats = self.process_cycle(resolver).await?;
            if stats.skipped {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
        let remaining = self.store.len().await?;
        info!(remaining, "orphaned queue drain finished");
        metrics::gauge!("orphaned_drain_remaining").set(remaining as f64);
        Ok(remaining)
    }

    /// Current queue gauges.
    pub async fn gauges(&self) -> CoreResult<QueueGauges> {
        let now = Utc::now();
        let cutoff = now - ChronoDuration::from_std(STALE_AFTER).unwrap_or(ChronoDuration::hours(1));
        Ok(QueueGauges {
            size: self.store.len().await?,
            ready_for_retry: self.store.ready_count(now).await?,
            processing: self.processing.load(Ordering::SeqCst),
            stale: self.store.stale_count(cutoff).await?,
        })
    }

    async fn publish_gauges(&self) {
        if let Ok(gauges) = self.gauges().await {
            metrics::gauge!("orphaned_queue_size").set(gauges.size as f64);
            metrics::gauge!("orphaned_queue_ready_for_retry").set(gauges.ready_for_retry as f64);
            metrics::gauge!("orphaned_queue_stale").set(gauges.stale as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::store::{MemoryDeadLetterStore, MemoryOrphanedStore};
    use super::*;
    use crate::model::EventType;
    use parking_lot::Mutex as PlMutex;

    fn queue(settings: OrphanedSettings) -> OrphanedEventQueue {
        OrphanedEventQueue::new(
            Arc::new(MemoryOrphanedStore::new()),
            Arc::new(MemoryDeadLetterStore::new()),
            settings,
        )
    }

    fn event(email: &str) -> NormalizedEvent {
        NormalizedEvent::new(EventType::Opened, "postmark", email, Utc::now())
    }

    /// Resolver that fails a configurable number of times, then succeeds.
    struct FlakyResolver {
        failures_left: PlMutex<u32>,
        resolved: PlMutex<Vec<uuid::Uuid>>,
    }

    impl FlakyResolver {
        fn failing(times: u32) -> Self {
            Self {
                failures_left: PlMutex::new(times),
                resolved: PlMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EventResolver for FlakyResolver {
        async fn resolve(&self, event: &NormalizedEvent) -> CoreResult<Resolution> {
            let mut left = self.failures_left.lock();
            if *left > 0 {
                *left -= 1;
                return Ok(Resolution::NotFound);
            }
            self.resolved.lock().push(event.id);
            Ok(Resolution::Handled)
        }
    }

    fn immediate_settings() -> OrphanedSettings {
        OrphanedSettings {
            max_size: 100,
            batch_size: 50,
            max_attempts: 6,
            // Zero delays make every retry immediately ready in tests.
            retry_delays_secs: vec![0, 0, 0, 0, 0, 0],
            cycle_interval_ms: 10,
        }
    }

    #[tokio::test]
    async fn overflow_evicts_exactly_the_oldest() {
        let settings = OrphanedSettings {
            max_size: 3,
            ..immediate_settings()
        };
        let queue = queue(settings);

        let first = event("first@ex.com");
        let first_id = first.id;
        queue.enqueue(first).await.expect("enqueue");
        for i in 0..3 {
            queue
                .enqueue(event(&format!("later{i}@ex.com")))
                .await
                .expect("enqueue");
        }

        let gauges = queue.gauges().await.expect("gauges");
        assert_eq!(gauges.size, 3);
        // The oldest entry is the one that was dropped.
        let resolver = FlakyResolver::failing(0);
        tokio::time::sleep(Duration::from_millis(1100)).await;
        queue.process_cycle(&resolver).await.expect("cycle");
        assert!(!resolver.resolved.lock().contains(&first_id));
    }

    #[tokio::test]
    async fn resolved_events_leave_the_queue() {
        let queue = queue(immediate_settings());
        queue.enqueue(event("bob@ex.com")).await.expect("enqueue");

        // Wait past the (jittered, zero-base) first delay.
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let resolver = FlakyResolver::failing(0);
        let stats = queue.process_cycle(&resolver).await.expect("cycle");
        assert_eq!(stats.succeeded, 1);
        assert_eq!(queue.gauges().await.expect("gauges").size, 0);
    }

    #[tokio::test]
    async fn exhausted_events_land_in_the_dlq_with_attempts_capped() {
        let settings = OrphanedSettings {
            max_attempts: 3,
            ..immediate_settings()
        };
        let queue = queue(settings);
        queue.enqueue(event("gone@ex.com")).await.expect("enqueue");

        let resolver = FlakyResolver::failing(u32::MAX);
        let mut moved = 0;
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(1100)).await;
            let stats = queue.process_cycle(&resolver).await.expect("cycle");
            moved += stats.moved_to_dlq;
            if moved > 0 {
                break;
            }
        }
        assert_eq!(moved, 1);
        assert_eq!(queue.gauges().await.expect("gauges").size, 0);

        let entries = queue
            .dlq_store()
            .list(10, 0, None)
            .await
            .expect("dlq list");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].attempts, 3);
        assert_eq!(entries[0].status, DlqStatus::Failed);
        assert!(entries[0].first_attempted_at.is_some());
    }

    #[tokio::test]
    async fn retry_delays_are_monotonic_without_jitter() {
        let queue = queue(OrphanedSettings::default());
        let mut last = Duration::ZERO;
        for attempt in 1..=6 {
            let delay = queue.delay_for_attempt(attempt);
            assert!(delay >= last, "attempt {attempt} regressed");
            last = delay;
        }
        assert_eq!(queue.delay_for_attempt(1), Duration::from_secs(5));
        assert_eq!(queue.delay_for_attempt(6), Duration::from_secs(3600));
        // Past the table the last delay repeats.
        assert_eq!(queue.delay_for_attempt(9), Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn drain_processes_ready_events_and_reports_remaining() {
        let queue = queue(immediate_settings());
        for i in 0..5 {
            queue
                .enqueue(event(&format!("lead{i}@ex.com")))
                .await
                .expect("enqueue");
        }
        tokio::time::sleep(Duration::from_millis(1100)).await;

        let resolver = FlakyResolver::failing(0);
        let remaining = queue
            .drain(&resolver, Duration::from_secs(5))
            .await
            .expect("drain");
        assert_eq!(remaining, 0);
        assert_eq!(resolver.resolved.lock().len(), 5);
    }

    #[tokio::test]
    async fn drain_respects_its_budget() {
        let queue = queue(immediate_settings());
        queue.enqueue(event("slow@ex.com")).await.expect("enqueue");

        // A zero budget returns immediately with the event still queued.
        let resolver = FlakyResolver::failing(0);
        let remaining = queue
            .drain(&resolver, Duration::ZERO)
            .await
            .expect("drain");
        assert_eq!(remaining, 1);
    }
}
