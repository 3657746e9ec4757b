//! The worker pool: claim loops, cooperative cancellation, drain.

use super::cancellation::CancellationToken;
use super::store::JobStore;
use super::{JobId, JobRecord, JobType};
use crate::config::QueueSettings;
use crate::error::CoreResult;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// What a worker run produced.
#[derive(Debug, Clone)]
pub enum WorkerOutcome {
    /// The job finished; the value is persisted as its result.
    Completed(serde_json::Value),
    /// The worker observed the cancel flag and stopped at a boundary.
    Cancelled,
}

/// Handle given to workers for progress, cancellation checks and batch
/// sizing.
#[derive(Clone)]
pub struct WorkerContext {
    job_id: JobId,
    store: Arc<dyn JobStore>,
    shutdown: CancellationToken,
    batch_size: usize,
}

impl WorkerContext {
    /// Context for exercising a worker directly, outside a pool.
    #[cfg(test)]
    pub(crate) fn detached(job_id: JobId, store: Arc<dyn JobStore>, batch_size: usize) -> Self {
        Self {
            job_id,
            store,
            shutdown: CancellationToken::new(),
            batch_size,
        }
    }

    /// Items to process between cancellation checks.
    #[must_use]
    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// The job being executed.
    #[must_use]
    pub const fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Check for cancellation at a batch boundary.
    ///
    /// True when the job's cancel flag is set or process shutdown began;
    /// the worker finishes its current item, flushes progress and returns
    /// [`WorkerOutcome::Cancelled`].
    pub async fn should_stop(&self) -> CoreResult<bool> {
        if self.shutdown.is_cancelled() {
            return Ok(true);
        }
        self.store.cancel_requested(self.job_id).await
    }

    /// Persist a progress fraction.
    pub async fn report_progress(&self, fraction: f64) -> CoreResult<()> {
        self.store.update_progress(self.job_id, fraction).await
    }
}

/// One typed pipeline worker.
#[async_trait]
pub trait PipelineWorker: Send + Sync {
    /// The job type this worker executes.
    fn job_type(&self) -> JobType;

    /// Execute a claimed job.
    ///
    /// A returned error marks the job failed; the queue never auto-retries.
    /// Workers wrap their own remote calls with the reliability layer
    /// instead.
    async fn execute(&self, job: &JobRecord, cx: &WorkerContext) -> CoreResult<WorkerOutcome>;
}

/// Fixed pool of claim loops over the shared job store.
pub struct WorkerPool {
    store: Arc<dyn JobStore>,
    registry: HashMap<JobType, Arc<dyn PipelineWorker>>,
    settings: QueueSettings,
    shutdown: CancellationToken,
    active: Arc<AtomicUsize>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Build an empty pool.
    #[must_use]
    pub fn new(store: Arc<dyn JobStore>, settings: QueueSettings) -> Self {
        Self {
            store,
            registry: HashMap::new(),
            settings,
            shutdown: CancellationToken::new(),
            active: Arc::new(AtomicUsize::new(0)),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Register a worker for its job type.
    pub fn register(&mut self, worker: Arc<dyn PipelineWorker>) {
        self.registry.insert(worker.job_type(), worker);
    }

    /// Number of jobs currently being executed by this pool.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Spawn the claim loops.
    pub fn start(&self) {
        let mut handles = self.handles.lock();
        for worker_index in 0..self.settings.workers.max(1) {
            let store = Arc::clone(&self.store);
            let registry = self.registry.clone();
            let shutdown = self.shutdown.clone();
            let active = Arc::clone(&self.active);
            let settings = self.settings.clone();
            handles.push(tokio::spawn(async move {
                claim_loop(worker_index, store, registry, shutdown, active, settings).await;
            }));
        }
        info!(workers = self.settings.workers, "worker pool started");
    }

    /// Release stale leases; called from the scheduled tick.
    pub async fn release_stale(&self) -> CoreResult<u64> {
        let released = self.store.release_stale().await?;
        if released > 0 {
            warn!(released, "released stale job leases");
            metrics::counter!("jobs_stale_leases_released").increment(released);
        }
        Ok(released)
    }

    /// Stop claiming, wait for in-flight jobs up to `max_wait`, then
    /// re-queue anything still marked processing.
    ///
    /// Returns `true` when the pool went idle within the budget. Either
    /// way, no job is left in `processing` when this returns.
    pub async fn shutdown(&self, max_wait: Duration) -> bool {
        self.shutdown.cancel();

        let deadline = tokio::time::Instant::now() + max_wait;
        let graceful = loop {
            if self.active.load(Ordering::SeqCst) == 0 {
                break true;
            }
            if tokio::time::Instant::now() >= deadline {
                break false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        };

        if !graceful {
            warn!(
                active = self.active.load(Ordering::SeqCst),
                "worker pool did not go idle within the shutdown budget"
            );
        }

        match self.store.requeue_inflight().await {
            Ok(requeued) if requeued > 0 => {
                warn!(requeued, "re-queued in-flight jobs during shutdown");
            }
            Ok(_) => {}
            Err(err) => error!(error = %err, "failed to re-queue in-flight jobs"),
        }

        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
        graceful
    }
}

async fn claim_loop(
    worker_index: usize,
    store: Arc<dyn JobStore>,
    registry: HashMap<JobType, Arc<dyn PipelineWorker>>,
    shutdown: CancellationToken,
    active: Arc<AtomicUsize>,
    settings: QueueSettings,
) {
    let lease = Uuid::new_v4();
    let lease_ttl = Duration::from_secs(settings.stale_lease_secs);
    let poll = Duration::from_millis(settings.poll_interval_ms);

    loop {
        if shutdown.is_cancelled() {
            break;
        }
        let claimed = match store.claim_next(lease, lease_ttl).await {
            Ok(job) => job,
            Err(err) => {
                error!(worker_index, error = %err, "job claim failed");
                tokio::time::sleep(poll).await;
                continue;
            }
        };
        let job = match claimed {
            Some(job) => job,
            None => {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(poll) => {}
                }
                continue;
            }
        };

        active.fetch_add(1, Ordering::SeqCst);
        run_job(&store, &registry, &shutdown, settings.batch_size, job).await;
        active.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn run_job(
    store: &Arc<dyn JobStore>,
    registry: &HashMap<JobType, Arc<dyn PipelineWorker>>,
    shutdown: &CancellationToken,
    batch_size: usize,
    job: JobRecord,
) {
    let Some(worker) = registry.get(&job.job_type) else {
        error!(job_id = %job.id, job_type = %job.job_type, "no worker registered");
        let _ = store
            .fail(job.id, &format!("no worker registered for {}", job.job_type))
            .await;
        metrics::counter!("jobs_failed", "type" => job.job_type.as_str()).increment(1);
        return;
    };

    let cx = WorkerContext {
        job_id: job.id,
        store: Arc::clone(store),
        shutdown: shutdown.clone(),
        batch_size,
    };

    let started = tokio::time::Instant::now();
    match worker.execute(&job, &cx).await {
        Ok(WorkerOutcome::Completed(result)) => {
            if let Err(err) = store.complete(job.id, result).await {
                error!(job_id = %job.id, error = %err, "failed to persist job completion");
                return;
            }
            metrics::counter!("jobs_completed", "type" => job.job_type.as_str()).increment(1);
            metrics::histogram!("jobs_duration_seconds", "type" => job.job_type.as_str())
                .record(started.elapsed().as_secs_f64());
            info!(job_id = %job.id, job_type = %job.job_type, "job completed");
        }
        Ok(WorkerOutcome::Cancelled) => {
            // Distinguish an explicit cancel (terminal) from a shutdown stop
            // (job goes back to pending via requeue_inflight).
            match store.cancel_requested(job.id).await {
                Ok(true) => {
                    if let Err(err) = store.finish_cancelled(job.id).await {
                        error!(job_id = %job.id, error = %err, "failed to persist job cancellation");
                        return;
                    }
                    metrics::counter!("jobs_cancelled", "type" => job.job_type.as_str())
                        .increment(1);
                    info!(job_id = %job.id, "job cancelled at batch boundary");
                }
                Ok(false) => {
                    info!(job_id = %job.id, "job interrupted by shutdown, will be re-queued");
                }
                Err(err) => {
                    error!(job_id = %job.id, error = %err, "failed to read cancel flag");
                }
            }
        }
        Err(err) => {
            if let Err(persist_err) = store.fail(job.id, &err.to_string()).await {
                error!(job_id = %job.id, error = %persist_err, "failed to persist job failure");
                return;
            }
            metrics::counter!("jobs_failed", "type" => job.job_type.as_str()).increment(1);
            warn!(job_id = %job.id, job_type = %job.job_type, error = %err, "job failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::store::MemoryJobStore;
    use super::super::{JobStatus, Priority};
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicBool;

    struct InstantWorker;

    #[async_trait]
    impl PipelineWorker for InstantWorker {
        fn job_type(&self) -> JobType {
            JobType::Import
        }

        async fn execute(
            &self,
            _job: &JobRecord,
            _cx: &WorkerContext,
        ) -> CoreResult<WorkerOutcome> {
            Ok(WorkerOutcome::Completed(json!({"ok": true})))
        }
    }

    /// Runs until cancelled, checking the flag every batch boundary.
    struct CooperativeWorker {
        saw_cancel: Arc<AtomicBool>,
    }

    #[async_trait]
    impl PipelineWorker for CooperativeWorker {
        fn job_type(&self) -> JobType {
            JobType::Enrich
        }

        async fn execute(&self, _job: &JobRecord, cx: &WorkerContext) -> CoreResult<WorkerOutcome> {
            loop {
                if cx.should_stop().await? {
                    self.saw_cancel.store(true, Ordering::SeqCst);
                    return Ok(WorkerOutcome::Cancelled);
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
    }

    fn fast_settings() -> QueueSettings {
        QueueSettings {
            workers: 2,
            poll_interval_ms: 5,
            ..QueueSettings::default()
        }
    }

    #[tokio::test]
    async fn pool_runs_jobs_to_completion() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let mut pool = WorkerPool::new(Arc::clone(&store), fast_settings());
        pool.register(Arc::new(InstantWorker));
        pool.start();

        let job = JobRecord::new(JobType::Import, json!({}), Priority::Normal);
        store.insert(&job).await.expect("insert");

        for _ in 0..100 {
            let current = store.get(job.id).await.expect("get").expect("job");
            if current.status == JobStatus::Completed {
                assert_eq!(current.result, Some(json!({"ok": true})));
                pool.shutdown(Duration::from_secs(1)).await;
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job never completed");
    }

    #[tokio::test]
    async fn unknown_job_type_fails_cleanly() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let mut pool = WorkerPool::new(Arc::clone(&store), fast_settings());
        pool.register(Arc::new(InstantWorker));
        pool.start();

        let job = JobRecord::new(JobType::CrmSync, json!({}), Priority::Normal);
        store.insert(&job).await.expect("insert");

        for _ in 0..100 {
            let current = store.get(job.id).await.expect("get").expect("job");
            if current.status == JobStatus::Failed {
                assert!(current.error.expect("error").contains("no worker"));
                pool.shutdown(Duration::from_secs(1)).await;
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job never failed");
    }

    #[tokio::test]
    async fn processing_job_cancels_at_boundary() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let saw_cancel = Arc::new(AtomicBool::new(false));
        let mut pool = WorkerPool::new(Arc::clone(&store), fast_settings());
        pool.register(Arc::new(CooperativeWorker {
            saw_cancel: Arc::clone(&saw_cancel),
        }));
        pool.start();

        let job = JobRecord::new(JobType::Enrich, json!({}), Priority::Normal);
        store.insert(&job).await.expect("insert");

        // Wait for the claim, then request cancellation.
        for _ in 0..100 {
            let current = store.get(job.id).await.expect("get").expect("job");
            if current.status == JobStatus::Processing {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        store.request_cancel(job.id).await.expect("cancel");

        for _ in 0..100 {
            let current = store.get(job.id).await.expect("get").expect("job");
            if current.status == JobStatus::Cancelled {
                assert!(saw_cancel.load(Ordering::SeqCst));
                pool.shutdown(Duration::from_secs(1)).await;
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job never cancelled");
    }

    #[tokio::test]
    async fn shutdown_leaves_no_processing_jobs() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let mut pool = WorkerPool::new(Arc::clone(&store), fast_settings());
        pool.register(Arc::new(CooperativeWorker {
            saw_cancel: Arc::new(AtomicBool::new(false)),
        }));
        pool.start();

        for _ in 0..3 {
            let job = JobRecord::new(JobType::Enrich, json!({}), Priority::Normal);
            store.insert(&job).await.expect("insert");
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        pool.shutdown(Duration::from_secs(2)).await;
        let counts = store.counts().await.expect("counts");
        assert_eq!(counts.processing, 0, "no job may stay in processing");
    }
}
