//! The core runtime: explicit construction, explicit lifecycle.
//!
//! Everything that used to be ambient (queues, tickers, provider
//! singletons) hangs off one [`CoreRuntime`] value constructed at startup
//! and passed into handlers. Tests construct fresh runtimes over the
//! in-memory stores.

use crate::config::OutboundConfig;
use crate::error::{CoreError, CoreResult};
use crate::jobs::{
    JobQueue, JobRecord, JobStore, JobType, MemoryJobStore, PgJobStore, PipelineWorker,
    WorkerContext, WorkerOutcome, WorkerPool,
};
use crate::orphaned::{
    DeadLetterQueue, MemoryDeadLetterStore, MemoryOrphanedStore, OrphanedEventQueue,
    PgDeadLetterStore, PgOrphanedStore,
};
use crate::providers::{ProviderSet, WebhookRegistry};
use crate::quality::{DohMxResolver, QualityGate, StaticMxResolver};
use crate::responder::{HttpReplyGenerator, ReplyGenerator, Responder, StaticKnowledge};
use crate::secrets::{keys, SecretStore};
use crate::store::{MemoryStores, PgStores, StoreKind, Stores};
use crate::workers::{
    CrmSyncWorker, EnrichmentWorker, EnrolWorker, EventIngestor, ImportWorker, IngestOutcome,
};
use crate::model::NormalizedEvent;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Health of one component.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    /// Whether the component is operational.
    pub healthy: bool,
    /// Human-readable detail.
    pub detail: String,
    /// Whether a failure here makes the whole service unhealthy.
    pub critical: bool,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Everything is up.
    Healthy,
    /// A non-critical component is down.
    Degraded,
    /// A critical component is down.
    Unhealthy,
}

/// Component map returned by the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Roll-up status.
    pub status: HealthStatus,
    /// Per-component health.
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthReport {
    fn from_components(components: HashMap<String, ComponentHealth>) -> Self {
        let status = if components.values().any(|c| !c.healthy && c.critical) {
            HealthStatus::Unhealthy
        } else if components.values().any(|c| !c.healthy) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        Self { status, components }
    }
}

/// Generator placeholder used when no generation endpoint is configured;
/// every reply lands in the manual-review queue.
struct ManualOnlyGenerator;

#[async_trait]
impl ReplyGenerator for ManualOnlyGenerator {
    async fn generate(&self, _system_prompt: &str, _user_prompt: &str) -> CoreResult<String> {
        Err(CoreError::Validation(
            "no reply generator configured".to_string(),
        ))
    }
}

/// Internal scheduled tick: stale-lease reaping and queue gauge upkeep.
struct TickWorker {
    job_store: Arc<dyn JobStore>,
    orphaned: OrphanedEventQueue,
}

#[async_trait]
impl PipelineWorker for TickWorker {
    fn job_type(&self) -> JobType {
        JobType::Tick
    }

    async fn execute(&self, _job: &JobRecord, _cx: &WorkerContext) -> CoreResult<WorkerOutcome> {
        let released = self.job_store.release_stale().await?;
        let gauges = self.orphaned.gauges().await?;
        Ok(WorkerOutcome::Completed(serde_json::json!({
            "stale_leases_released": released,
            "orphaned_queue_size": gauges.size,
        })))
    }
}

/// The assembled core.
pub struct CoreRuntime {
    config: OutboundConfig,
    stores: Stores,
    job_store: Arc<dyn JobStore>,
    queue: JobQueue,
    pool: Arc<WorkerPool>,
    orphaned: OrphanedEventQueue,
    dlq: DeadLetterQueue,
    providers: ProviderSet,
    responder: Arc<Responder>,
    ingestor: EventIngestor,
    db_pool: Option<PgPool>,
    accepting_events: AtomicBool,
    tickers: Mutex<Vec<JoinHandle<()>>>,
}

impl CoreRuntime {
    /// Assemble the runtime from configuration.
    ///
    /// With `database.url` set, every store is Postgres-backed; without it
    /// the in-memory fallback is used, which is for development only.
    ///
    /// # Errors
    ///
    /// Returns an error when the secret backend or the database pool cannot
    /// be initialised.
    pub async fn build(config: OutboundConfig) -> CoreResult<Self> {
        let secrets = SecretStore::from_settings(&config.secrets)?;

        let (stores, job_store, orphaned_store, dlq_store, db_pool) =
            match &config.database.url {
                Some(url) => {
                    let max = config.database.max_connections.unwrap_or(10);
                    let (stores, pool) = PgStores::connect(url, max).await?;
                    (
                        stores,
                        Arc::new(PgJobStore::new(pool.clone())) as Arc<dyn JobStore>,
                        Arc::new(PgOrphanedStore::new(pool.clone()))
                            as Arc<dyn crate::orphaned::OrphanedEventStore>,
                        Arc::new(PgDeadLetterStore::new(pool.clone()))
                            as Arc<dyn crate::orphaned::DeadLetterStore>,
                        Some(pool),
                    )
                }
                None => {
                    warn!(
                        "no database configured; using in-memory stores \
                         (not production safe)"
                    );
                    (
                        MemoryStores::stores(),
                        Arc::new(MemoryJobStore::new()) as Arc<dyn JobStore>,
                        Arc::new(MemoryOrphanedStore::new())
                            as Arc<dyn crate::orphaned::OrphanedEventStore>,
                        Arc::new(MemoryDeadLetterStore::new())
                            as Arc<dyn crate::orphaned::DeadLetterStore>,
                        None,
                    )
                }
            };

        let queue = JobQueue::new(Arc::clone(&job_store), config.queue.clone());
        let orphaned =
            OrphanedEventQueue::new(orphaned_store, dlq_store, config.orphaned.clone());
        let dlq = DeadLetterQueue::new(orphaned.dlq_store(), orphaned.clone());

        let providers = ProviderSet::build(&config, &secrets, stores.idempotency.clone());

        let resolver: Arc<dyn crate::quality::MxResolver> = if db_pool.is_some() {
            Arc::new(DohMxResolver::new())
        } else {
            // Offline development: skip real DNS traffic.
            Arc::new(StaticMxResolver::accepting())
        };
        let gate = QualityGate::new(resolver);

        let generator: Arc<dyn ReplyGenerator> = match (
            secrets.get_opt("GENERATOR_ENDPOINT"),
            secrets.get_opt(keys::GENERATOR_KEY),
        ) {
            (Some(endpoint), Some(key)) => Arc::new(HttpReplyGenerator::new(&endpoint, &key)),
            _ => {
                warn!("no reply generator configured; replies queue for manual review");
                Arc::new(ManualOnlyGenerator)
            }
        };

        let responder = Arc::new(Responder::new(
            stores.threads.clone(),
            stores.manual_review.clone(),
            generator,
            Arc::new(StaticKnowledge::default()),
            providers.email.clone(),
            providers.linkedin.clone(),
            providers.video.clone(),
            config.responder.clone(),
        ));

        let ingestor = EventIngestor::new(
            stores.enrolments.clone(),
            stores.outcomes.clone(),
            stores.contacts.clone(),
            stores.campaigns.clone(),
            Arc::clone(&responder),
            orphaned.clone(),
        );

        let mut pool = WorkerPool::new(Arc::clone(&job_store), config.queue.clone());
        pool.register(Arc::new(ImportWorker::new(stores.contacts.clone())));
        pool.register(Arc::new(EnrolWorker::new(
            stores.contacts.clone(),
            stores.campaigns.clone(),
            stores.enrolments.clone(),
            stores.outcomes.clone(),
            stores.idempotency.clone(),
            providers.email.clone(),
            providers.linkedin.clone(),
            gate,
        )));
        if let Some(enrichment) = &providers.enrichment {
            pool.register(Arc::new(EnrichmentWorker::new(
                stores.contacts.clone(),
                stores.companies.clone(),
                stores.enrichment_cache.clone(),
                Arc::clone(enrichment),
            )));
        }
        if let Some(crm) = &providers.crm {
            pool.register(Arc::new(CrmSyncWorker::new(
                stores.contacts.clone(),
                stores.sync_ledger.clone(),
                Arc::clone(crm),
            )));
        }
        pool.register(Arc::new(TickWorker {
            job_store: Arc::clone(&job_store),
            orphaned: orphaned.clone(),
        }));

        Ok(Self {
            config,
            stores,
            job_store,
            queue,
            pool: Arc::new(pool),
            orphaned,
            dlq,
            providers,
            responder,
            ingestor,
            db_pool,
            accepting_events: AtomicBool::new(true),
            tickers: Mutex::new(Vec::new()),
        })
    }

    /// Start worker loops and periodic tasks.
    pub fn start(&self) {
        self.pool.start();
        self.responder.start();

        let orphaned = self.orphaned.clone();
        let ingestor = self.ingestor.clone();
        let cycle = Duration::from_millis(self.config.orphaned.cycle_interval_ms);
        let mut tickers = self.tickers.lock();
        tickers.push(tokio::spawn(async move {
            loop {
                tokio::time::sleep(cycle).await;
                if let Err(err) = orphaned.process_cycle(&ingestor).await {
                    warn!(error = %err, "orphaned-event cycle failed");
                }
            }
        }));

        let job_store = Arc::clone(&self.job_store);
        let reap_every = Duration::from_secs(self.config.queue.stale_lease_secs.max(1) / 2 + 1);
        tickers.push(tokio::spawn(async move {
            loop {
                tokio::time::sleep(reap_every).await;
                match job_store.release_stale().await {
                    Ok(released) if released > 0 => {
                        warn!(released, "re-queued jobs with stale leases");
                    }
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "stale-lease reaping failed"),
                }
            }
        }));

        info!("core runtime started");
    }

    /// Job queue surface.
    #[must_use]
    pub const fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Dead-letter admin surface.
    #[must_use]
    pub const fn dlq(&self) -> &DeadLetterQueue {
        &self.dlq
    }

    /// Orphaned-event queue (gauges, admin).
    #[must_use]
    pub const fn orphaned(&self) -> &OrphanedEventQueue {
        &self.orphaned
    }

    /// Webhook verification/normalisation registry.
    #[must_use]
    pub const fn webhooks(&self) -> &WebhookRegistry {
        &self.providers.webhooks
    }

    /// Domain stores.
    #[must_use]
    pub const fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Configuration the runtime was built from.
    #[must_use]
    pub const fn config(&self) -> &OutboundConfig {
        &self.config
    }

    /// Ingest a verified, normalised webhook event.
    ///
    /// # Errors
    ///
    /// [`CoreError::ShutdownInProgress`] once shutdown has begun.
    pub async fn ingest_event(&self, event: &NormalizedEvent) -> CoreResult<IngestOutcome> {
        if !self.accepting_events.load(Ordering::SeqCst) {
            return Err(CoreError::ShutdownInProgress);
        }
        self.ingestor.ingest(event).await
    }

    /// Component health map.
    pub async fn health(&self) -> HealthReport {
        let mut components = HashMap::new();

        let database = match (&self.db_pool, self.stores.kind) {
            (Some(pool), _) => match sqlx::query("SELECT 1").execute(pool).await {
                Ok(_) => ComponentHealth {
                    healthy: true,
                    detail: "postgres reachable".to_string(),
                    critical: true,
                },
                Err(err) => ComponentHealth {
                    healthy: false,
                    detail: format!("postgres unreachable: {err}"),
                    critical: true,
                },
            },
            (None, StoreKind::Memory) => ComponentHealth {
                healthy: true,
                detail: "in-memory fallback (not production safe)".to_string(),
                critical: true,
            },
            (None, StoreKind::Postgres) => ComponentHealth {
                healthy: false,
                detail: "postgres stores without a pool".to_string(),
                critical: true,
            },
        };
        components.insert("database".to_string(), database);

        let queue_detail = match self.queue.counts().await {
            Ok(counts) => ComponentHealth {
                healthy: true,
                detail: format!(
                    "pending {} processing {}",
                    counts.pending, counts.processing
                ),
                critical: true,
            },
            Err(err) => ComponentHealth {
                healthy: false,
                detail: format!("job store unreachable: {err}"),
                critical: true,
            },
        };
        components.insert("queue_store".to_string(), queue_detail);

        let orphaned = match self.orphaned.gauges().await {
            Ok(gauges) => ComponentHealth {
                healthy: gauges.size < self.config.orphaned.max_size,
                detail: format!(
                    "size {} ready {} stale {}",
                    gauges.size, gauges.ready_for_retry, gauges.stale
                ),
                critical: false,
            },
            Err(err) => ComponentHealth {
                healthy: false,
                detail: format!("orphaned store unreachable: {err}"),
                critical: false,
            },
        };
        components.insert("orphaned_queue".to_string(), orphaned);

        for (provider, state) in self.providers.breaker_states() {
            components.insert(
                format!("provider_{provider}"),
                ComponentHealth {
                    healthy: state == crate::reliability::BreakerState::Closed,
                    detail: format!("breaker {}", state.name()),
                    critical: false,
                },
            );
        }

        HealthReport::from_components(components)
    }

    /// Graceful shutdown, in order: stop webhook intake, stop accepting
    /// jobs, drain the orphaned queue, wait for the worker pool, stop the
    /// responder and periodic tasks. A step exceeding its budget logs a
    /// warning and shutdown continues.
    pub async fn shutdown(&self) {
        info!("core shutdown starting");
        self.accepting_events.store(false, Ordering::SeqCst);
        self.queue.begin_shutdown();

        let drain_budget = Duration::from_millis(self.config.shutdown.drain_ms);
        match self.orphaned.drain(&self.ingestor, drain_budget).await {
            Ok(remaining) => {
                if remaining > 0 {
                    warn!(remaining, "orphaned events left after drain budget");
                }
                metrics::gauge!("shutdown_orphaned_remaining").set(remaining as f64);
            }
            Err(err) => warn!(error = %err, "orphaned drain failed"),
        }

        let stop_budget = Duration::from_millis(self.config.shutdown.worker_stop_ms);
        if !self.pool.shutdown(stop_budget).await {
            warn!("worker pool stopped past its shutdown budget");
        }

        self.responder.shutdown();
        for ticker in self.tickers.lock().drain(..) {
            ticker.abort();
        }
        metrics::counter!("shutdowns_completed").increment(1);
        info!("core shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobStatus, Priority};
    use serde_json::json;

    fn memory_config() -> OutboundConfig {
        let mut config = OutboundConfig::default();
        config.queue.workers = 2;
        config.queue.poll_interval_ms = 10;
        config.orphaned.cycle_interval_ms = 50;
        config.shutdown.drain_ms = 500;
        config.shutdown.worker_stop_ms = 1_000;
        config
    }

    #[tokio::test]
    async fn runtime_builds_on_memory_stores_without_secrets() {
        let runtime = CoreRuntime::build(memory_config()).await.expect("build");
        assert_eq!(runtime.stores().kind, StoreKind::Memory);
        let report = runtime.health().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.components.contains_key("database"));
        assert!(report.components.contains_key("queue_store"));
        assert!(report.components.contains_key("orphaned_queue"));
    }

    #[tokio::test]
    async fn jobs_flow_end_to_end_through_the_runtime() {
        let runtime = CoreRuntime::build(memory_config()).await.expect("build");
        runtime.start();

        let id = runtime
            .queue()
            .enqueue(
                JobType::Import,
                json!({ "contacts": [{ "email": "alice@example.com" }] }),
                Priority::High,
            )
            .await
            .expect("enqueue");

        for _ in 0..200 {
            let job = runtime
                .queue()
                .status(id)
                .await
                .expect("status")
                .expect("job");
            if job.status == JobStatus::Completed {
                let stats = job.result.expect("result");
                assert_eq!(stats["inserted"], 1);
                runtime.shutdown().await;
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("import job never completed");
    }

    #[tokio::test]
    async fn shutdown_rejects_new_work_and_leaves_no_processing() {
        let runtime = CoreRuntime::build(memory_config()).await.expect("build");
        runtime.start();
        runtime.shutdown().await;

        let err = runtime
            .queue()
            .enqueue(JobType::Import, json!({}), Priority::Normal)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ShutdownInProgress));

        let event = NormalizedEvent::new(
            crate::model::EventType::Opened,
            "postmark",
            "a@b.c",
            chrono::Utc::now(),
        );
        let err = runtime.ingest_event(&event).await.unwrap_err();
        assert!(matches!(err, CoreError::ShutdownInProgress));

        let counts = runtime.queue().counts().await.expect("counts");
        assert_eq!(counts.processing, 0);
    }

    #[tokio::test]
    async fn orphaned_events_drain_during_shutdown() {
        let mut config = memory_config();
        // Immediate retries so the drain can make progress.
        config.orphaned.retry_delays_secs = vec![0, 0, 0, 0, 0, 0];
        let runtime = CoreRuntime::build(config).await.expect("build");
        runtime.start();

        // An event with no matching enrolment gets buffered.
        let event = NormalizedEvent::new(
            crate::model::EventType::Opened,
            "postmark",
            "ghost@ex.com",
            chrono::Utc::now(),
        )
        .with_message_id("PM-GHOST");
        assert_eq!(
            runtime.ingest_event(&event).await.expect("ingest"),
            IngestOutcome::Orphaned
        );

        runtime.shutdown().await;
        // The drain runs only its budget: the unresolvable event is either
        // still queued or, after enough immediate retries, in the DLQ.
        let gauges = runtime.orphaned().gauges().await.expect("gauges");
        let dead = runtime.dlq().list(10, 0, None).await.expect("dlq");
        assert_eq!(gauges.size + dead.len(), 1);
    }
}
