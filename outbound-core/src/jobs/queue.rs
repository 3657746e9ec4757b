//! The job queue service surface.

use super::store::{CancelOutcome, JobCounts, JobStore};
use super::{JobFilter, JobId, JobRecord, JobType, Priority};
use crate::config::QueueSettings;
use crate::error::{CoreError, CoreResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Producer/admin surface over the durable job store.
///
/// Every state change is persisted before the caller gets an acknowledgement.
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    settings: QueueSettings,
    shutting_down: Arc<AtomicBool>,
}

impl JobQueue {
    /// Build the queue over a store.
    #[must_use]
    pub fn new(store: Arc<dyn JobStore>, settings: QueueSettings) -> Self {
        Self {
            store,
            settings,
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The underlying store, shared with the worker pool.
    #[must_use]
    pub fn store(&self) -> Arc<dyn JobStore> {
        Arc::clone(&self.store)
    }

    /// Enqueue a job; returns its id once the row is durable.
    ///
    /// # Errors
    ///
    /// [`CoreError::ShutdownInProgress`] after shutdown began;
    /// [`CoreError::RateLimited`] when the queue is at capacity.
    pub async fn enqueue(
        &self,
        job_type: JobType,
        params: serde_json::Value,
        priority: Priority,
    ) -> CoreResult<JobId> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(CoreError::ShutdownInProgress);
        }
        let counts = self.store.counts().await?;
        if usize::try_from(counts.pending).unwrap_or(usize::MAX) >= self.settings.max_size {
            return Err(CoreError::RateLimited { retry_after: None });
        }

        let job = JobRecord::new(job_type, params, priority);
        self.store.insert(&job).await?;
        metrics::counter!("jobs_enqueued", "type" => job_type.as_str()).increment(1);
        info!(job_id = %job.id, job_type = %job_type, priority = ?priority, "job enqueued");
        Ok(job.id)
    }

    /// Fetch a job's current record.
    pub async fn status(&self, id: JobId) -> CoreResult<Option<JobRecord>> {
        self.store.get(id).await
    }

    /// List jobs for the admin surface.
    pub async fn list(&self, filter: &JobFilter) -> CoreResult<Vec<JobRecord>> {
        self.store.list(filter).await
    }

    /// Cancel a job.
    ///
    /// Pending jobs cancel immediately; processing jobs get a flag observed
    /// cooperatively by the worker at its next batch boundary.
    pub async fn cancel(&self, id: JobId) -> CoreResult<CancelOutcome> {
        let outcome = self.store.request_cancel(id).await?;
        if matches!(outcome, CancelOutcome::Cancelled | CancelOutcome::Flagged) {
            metrics::counter!("jobs_cancel_requests").increment(1);
        }
        Ok(outcome)
    }

    /// Persist a progress update.
    pub async fn update_progress(&self, id: JobId, fraction: f64) -> CoreResult<()> {
        self.store.update_progress(id, fraction).await
    }

    /// Persist a terminal status, with a result or error as appropriate.
    ///
    /// The worker pool normally drives these transitions; this surface
    /// exists for out-of-band completion (operator tooling, recovery).
    pub async fn update_status(
        &self,
        id: JobId,
        status: super::JobStatus,
        result: Option<serde_json::Value>,
        error: Option<&str>,
    ) -> CoreResult<()> {
        match status {
            super::JobStatus::Completed => {
                self.store
                    .complete(id, result.unwrap_or(serde_json::Value::Null))
                    .await
            }
            super::JobStatus::Failed => {
                self.store.fail(id, error.unwrap_or("failed")).await
            }
            super::JobStatus::Cancelled => self.store.finish_cancelled(id).await,
            other => Err(CoreError::validation(format!(
                "cannot force a job into the {other} state"
            ))),
        }
    }

    /// Current per-status counts.
    pub async fn counts(&self) -> CoreResult<JobCounts> {
        self.store.counts().await
    }

    /// Stop accepting new jobs.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    /// Whether shutdown has begun.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Queue batch size, shared with workers as the cancellation-check
    /// granularity.
    #[must_use]
    pub const fn batch_size(&self) -> usize {
        self.settings.batch_size
    }
}
