//! Durable job storage.
//!
//! The claim is the critical operation: it must move a job from `pending`
//! to `processing` atomically so that no two workers ever hold the same
//! job. Postgres uses `FOR UPDATE SKIP LOCKED`; the in-memory fallback uses
//! one critical section.

use super::{JobFilter, JobId, JobRecord, JobStatus, JobType, Priority};
use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was pending and is now cancelled.
    Cancelled,
    /// The job is processing; the flag was set for the worker to observe.
    Flagged,
    /// The job already reached a terminal state.
    AlreadyTerminal,
    /// No such job.
    NotFound,
}

/// Per-status job counts for metrics and health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounts {
    /// Jobs waiting for a worker.
    pub pending: u64,
    /// Jobs currently leased.
    pub processing: u64,
    /// Jobs finished successfully.
    pub completed: u64,
    /// Jobs that failed.
    pub failed: u64,
    /// Jobs cancelled.
    pub cancelled: u64,
}

/// Durable job store.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a fresh pending job.
    async fn insert(&self, job: &JobRecord) -> CoreResult<()>;

    /// Fetch a job.
    async fn get(&self, id: JobId) -> CoreResult<Option<JobRecord>>;

    /// List jobs matching the filter, newest first.
    async fn list(&self, filter: &JobFilter) -> CoreResult<Vec<JobRecord>>;

    /// Atomically claim the next pending job: highest priority first, ties
    /// broken by earliest `created_at`.
    async fn claim_next(&self, lease: Uuid, lease_ttl: Duration)
        -> CoreResult<Option<JobRecord>>;

    /// Persist a progress fraction.
    async fn update_progress(&self, id: JobId, progress: f64) -> CoreResult<()>;

    /// Mark a job completed with its result.
    async fn complete(&self, id: JobId, result: serde_json::Value) -> CoreResult<()>;

    /// Mark a job failed with an error message.
    async fn fail(&self, id: JobId, error: &str) -> CoreResult<()>;

    /// Request cancellation.
    async fn request_cancel(&self, id: JobId) -> CoreResult<CancelOutcome>;

    /// Whether cancellation was requested for a job.
    async fn cancel_requested(&self, id: JobId) -> CoreResult<bool>;

    /// Worker observed the cancel flag: move `processing` to `cancelled`.
    async fn finish_cancelled(&self, id: JobId) -> CoreResult<()>;

    /// Re-queue `processing` jobs whose lease expired; returns how many.
    async fn release_stale(&self) -> CoreResult<u64>;

    /// Re-queue every `processing` job (clean shutdown); returns how many.
    async fn requeue_inflight(&self) -> CoreResult<u64>;

    /// Per-status counts.
    async fn counts(&self) -> CoreResult<JobCounts>;
}

/// In-memory job store.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<JobId, JobRecord>>,
}

impl MemoryJobStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &JobRecord) -> CoreResult<()> {
        self.jobs.lock().insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: JobId) -> CoreResult<Option<JobRecord>> {
        Ok(self.jobs.lock().get(&id).cloned())
    }

    async fn list(&self, filter: &JobFilter) -> CoreResult<Vec<JobRecord>> {
        let jobs = self.jobs.lock();
        let mut matched: Vec<JobRecord> = jobs
            .values()
            .filter(|j| filter.status.is_none_or(|s| j.status == s))
            .filter(|j| filter.job_type.is_none_or(|t| j.job_type == t))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matched.truncate(filter.limit.unwrap_or(100));
        Ok(matched)
    }

    async fn claim_next(
        &self,
        lease: Uuid,
        lease_ttl: Duration,
    ) -> CoreResult<Option<JobRecord>> {
        let mut jobs = self.jobs.lock();
        let next = jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .min_by(|a, b| {
                b.priority
                    .rank()
                    .cmp(&a.priority.rank())
                    .then(a.created_at.cmp(&b.created_at))
            })
            .map(|j| j.id);
        let Some(id) = next else { return Ok(None) };
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };
        let now = Utc::now();
        job.status = JobStatus::Processing;
        job.lease = Some(lease);
        job.lease_expires_at = now.checked_add_signed(
            ChronoDuration::from_std(lease_ttl).unwrap_or(ChronoDuration::seconds(300)),
        );
        job.attempts += 1;
        job.started_at.get_or_insert(now);
        Ok(Some(job.clone()))
    }

    async fn update_progress(&self, id: JobId, progress: f64) -> CoreResult<()> {
        let mut jobs = self.jobs.lock();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("job {id}")))?;
        job.progress = progress.clamp(0.0, 1.0);
        Ok(())
    }

    async fn complete(&self, id: JobId, result: serde_json::Value) -> CoreResult<()> {
        let mut jobs = self.jobs.lock();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("job {id}")))?;
        job.status = JobStatus::Completed;
        job.progress = 1.0;
        job.result = Some(result);
        job.completed_at = Some(Utc::now());
        job.lease = None;
        job.lease_expires_at = None;
        Ok(())
    }

    async fn fail(&self, id: JobId, error: &str) -> CoreResult<()> {
        let mut jobs = self.jobs.lock();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("job {id}")))?;
        job.status = JobStatus::Failed;
        job.error = Some(error.to_string());
        job.completed_at = Some(Utc::now());
        job.lease = None;
        job.lease_expires_at = None;
        Ok(())
    }

    async fn request_cancel(&self, id: JobId) -> CoreResult<CancelOutcome> {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(CancelOutcome::NotFound);
        };
        match job.status {
            JobStatus::Pending => {
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(Utc::now());
                Ok(CancelOutcome::Cancelled)
            }
            JobStatus::Processing => {
                job.cancel_requested = true;
                Ok(CancelOutcome::Flagged)
            }
            _ => Ok(CancelOutcome::AlreadyTerminal),
        }
    }

    async fn cancel_requested(&self, id: JobId) -> CoreResult<bool> {
        Ok(self
            .jobs
            .lock()
            .get(&id)
            .is_some_and(|j| j.cancel_requested))
    }

    async fn finish_cancelled(&self, id: JobId) -> CoreResult<()> {
        let mut jobs = self.jobs.lock();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("job {id}")))?;
        job.status = JobStatus::Cancelled;
        job.completed_at = Some(Utc::now());
        job.lease = None;
        job.lease_expires_at = None;
        Ok(())
    }

    async fn release_stale(&self) -> CoreResult<u64> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock();
        let mut released = 0;
        for job in jobs.values_mut() {
            if job.status == JobStatus::Processing
                && job.lease_expires_at.is_some_and(|at| at < now)
            {
                job.status = JobStatus::Pending;
                job.lease = None;
                job.lease_expires_at = None;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn requeue_inflight(&self) -> CoreResult<u64> {
        let mut jobs = self.jobs.lock();
        let mut requeued = 0;
        for job in jobs.values_mut() {
            if job.status == JobStatus::Processing {
                job.status = JobStatus::Pending;
                job.lease = None;
                job.lease_expires_at = None;
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    async fn counts(&self) -> CoreResult<JobCounts> {
        let jobs = self.jobs.lock();
        let mut counts = JobCounts::default();
        for job in jobs.values() {
            match job.status {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Processing => counts.processing += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
                JobStatus::Cancelled => counts.cancelled += 1,
            }
        }
        Ok(counts)
    }
}

/// Postgres job store.
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    /// Build from a pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const JOB_COLUMNS: &str = "id, job_type, priority, params, status, progress, attempts, \
     created_at, started_at, completed_at, result, error, lease, lease_expires_at, \
     cancel_requested";

fn job_from_row(row: &sqlx::postgres::PgRow) -> CoreResult<JobRecord> {
    let job_type: String = row.try_get("job_type")?;
    let status: String = row.try_get("status")?;
    Ok(JobRecord {
        id: JobId::from(row.try_get::<Uuid, _>("id")?),
        job_type: job_type.parse::<JobType>()?,
        priority: Priority::from_rank(row.try_get("priority")?),
        params: row.try_get("params")?,
        status: status.parse::<JobStatus>()?,
        progress: row.try_get("progress")?,
        attempts: u32::try_from(row.try_get::<i32, _>("attempts")?).unwrap_or(0),
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        result: row.try_get("result")?,
        error: row.try_get("error")?,
        lease: row.try_get("lease")?,
        lease_expires_at: row.try_get("lease_expires_at")?,
        cancel_requested: row.try_get("cancel_requested")?,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, job: &JobRecord) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO jobs (id, job_type, priority, params, status, progress, attempts, \
             created_at, cancel_requested) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(Uuid::from(job.id))
        .bind(job.job_type.as_str())
        .bind(job.priority.rank())
        .bind(&job.params)
        .bind(job.status.name())
        .bind(job.progress)
        .bind(i32::try_from(job.attempts).unwrap_or(0))
        .bind(job.created_at)
        .bind(job.cancel_requested)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: JobId) -> CoreResult<Option<JobRecord>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn list(&self, filter: &JobFilter) -> CoreResult<Vec<JobRecord>> {
        let limit = i64::try_from(filter.limit.unwrap_or(100)).unwrap_or(100);
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE ($1::text IS NULL OR status = $1) \
             AND ($2::text IS NULL OR job_type = $2) \
             ORDER BY created_at DESC LIMIT $3"
        ))
        .bind(filter.status.map(|s| s.name().to_string()))
        .bind(filter.job_type.map(|t| t.as_str().to_string()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn claim_next(
        &self,
        lease: Uuid,
        lease_ttl: Duration,
    ) -> CoreResult<Option<JobRecord>> {
        let expires = Utc::now()
            + ChronoDuration::from_std(lease_ttl).unwrap_or(ChronoDuration::seconds(300));
        let row = sqlx::query(&format!(
            "WITH claimed AS (\
                 SELECT id FROM jobs WHERE status = 'pending' \
                 ORDER BY priority DESC, created_at ASC LIMIT 1 \
                 FOR UPDATE SKIP LOCKED\
             ) \
             UPDATE jobs SET status = 'processing', lease = $1, lease_expires_at = $2, \
             attempts = attempts + 1, started_at = COALESCE(started_at, NOW()) \
             FROM claimed WHERE jobs.id = claimed.id \
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(lease)
        .bind(expires)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn update_progress(&self, id: JobId, progress: f64) -> CoreResult<()> {
        sqlx::query("UPDATE jobs SET progress = $2 WHERE id = $1")
            .bind(Uuid::from(id))
            .bind(progress.clamp(0.0, 1.0))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn complete(&self, id: JobId, result: serde_json::Value) -> CoreResult<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'completed', progress = 1.0, result = $2, \
             completed_at = NOW(), lease = NULL, lease_expires_at = NULL WHERE id = $1",
        )
        .bind(Uuid::from(id))
        .bind(result)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail(&self, id: JobId, error: &str) -> CoreResult<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'failed', error = $2, completed_at = NOW(), \
             lease = NULL, lease_expires_at = NULL WHERE id = $1",
        )
        .bind(Uuid::from(id))
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn request_cancel(&self, id: JobId) -> CoreResult<CancelOutcome> {
        let row = sqlx::query(
            "UPDATE jobs SET \
             status = CASE WHEN status = 'pending' THEN 'cancelled' ELSE status END, \
             completed_at = CASE WHEN status = 'pending' THEN NOW() ELSE completed_at END, \
             cancel_requested = CASE WHEN status = 'processing' THEN TRUE \
                                     ELSE cancel_requested END \
             WHERE id = $1 RETURNING status, cancel_requested",
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(CancelOutcome::NotFound);
        };
        let status: String = row.try_get("status")?;
        let flagged: bool = row.try_get("cancel_requested")?;
        Ok(match status.parse::<JobStatus>()? {
            JobStatus::Cancelled => CancelOutcome::Cancelled,
            JobStatus::Processing if flagged => CancelOutcome::Flagged,
            _ => CancelOutcome::AlreadyTerminal,
        })
    }

    async fn cancel_requested(&self, id: JobId) -> CoreResult<bool> {
        let row = sqlx::query("SELECT cancel_requested FROM jobs WHERE id = $1")
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row
            .map(|r| r.try_get("cancel_requested"))
            .transpose()?
            .unwrap_or(false))
    }

    async fn finish_cancelled(&self, id: JobId) -> CoreResult<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'cancelled', completed_at = NOW(), lease = NULL, \
             lease_expires_at = NULL WHERE id = $1",
        )
        .bind(Uuid::from(id))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn release_stale(&self) -> CoreResult<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'pending', lease = NULL, lease_expires_at = NULL \
             WHERE status = 'processing' AND lease_expires_at < NOW()",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn requeue_inflight(&self) -> CoreResult<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'pending', lease = NULL, lease_expires_at = NULL \
             WHERE status = 'processing'",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn counts(&self) -> CoreResult<JobCounts> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        let mut counts = JobCounts::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let n = u64::try_from(row.try_get::<i64, _>("n")?).unwrap_or(0);
            match status.parse::<JobStatus>()? {
                JobStatus::Pending => counts.pending = n,
                JobStatus::Processing => counts.processing = n,
                JobStatus::Completed => counts.completed = n,
                JobStatus::Failed => counts.failed = n,
                JobStatus::Cancelled => counts.cancelled = n,
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job(priority: Priority) -> JobRecord {
        JobRecord::new(JobType::Import, json!({}), priority)
    }

    #[tokio::test]
    async fn claims_highest_priority_first() {
        let store = MemoryJobStore::new();
        let low = job(Priority::Low);
        let critical = job(Priority::Critical);
        let normal = job(Priority::Normal);
        for j in [&low, &critical, &normal] {
            store.insert(j).await.expect("insert");
        }

        let lease = Uuid::new_v4();
        let ttl = Duration::from_secs(300);
        let first = store.claim_next(lease, ttl).await.expect("claim").expect("job");
        assert_eq!(first.id, critical.id);
        let second = store.claim_next(lease, ttl).await.expect("claim").expect("job");
        assert_eq!(second.id, normal.id);
        let third = store.claim_next(lease, ttl).await.expect("claim").expect("job");
        assert_eq!(third.id, low.id);
        assert!(store.claim_next(lease, ttl).await.expect("claim").is_none());
    }

    #[tokio::test]
    async fn ties_break_by_creation_order() {
        let store = MemoryJobStore::new();
        let mut first = job(Priority::Normal);
        let mut second = job(Priority::Normal);
        first.created_at = Utc::now() - ChronoDuration::seconds(10);
        second.created_at = Utc::now();
        store.insert(&second).await.expect("insert");
        store.insert(&first).await.expect("insert");

        let claimed = store
            .claim_next(Uuid::new_v4(), Duration::from_secs(300))
            .await
            .expect("claim")
            .expect("job");
        assert_eq!(claimed.id, first.id);
    }

    #[tokio::test]
    async fn concurrent_claims_never_share_a_job() {
        let store = std::sync::Arc::new(MemoryJobStore::new());
        for _ in 0..4 {
            store.insert(&job(Priority::Normal)).await.expect("insert");
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = std::sync::Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .claim_next(Uuid::new_v4(), Duration::from_secs(300))
                    .await
                    .expect("claim")
            }));
        }
        let mut claimed = Vec::new();
        for handle in handles {
            if let Some(job) = handle.await.expect("join") {
                claimed.push(job.id);
            }
        }
        claimed.sort_by_key(ToString::to_string);
        claimed.dedup();
        assert_eq!(claimed.len(), 4);
    }

    #[tokio::test]
    async fn cancel_pending_is_immediate() {
        let store = MemoryJobStore::new();
        let pending = job(Priority::Normal);
        store.insert(&pending).await.expect("insert");

        let outcome = store.request_cancel(pending.id).await.expect("cancel");
        assert_eq!(outcome, CancelOutcome::Cancelled);
        let job = store.get(pending.id).await.expect("get").expect("job");
        assert_eq!(job.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_processing_sets_the_flag() {
        let store = MemoryJobStore::new();
        let record = job(Priority::Normal);
        store.insert(&record).await.expect("insert");
        store
            .claim_next(Uuid::new_v4(), Duration::from_secs(300))
            .await
            .expect("claim");

        let outcome = store.request_cancel(record.id).await.expect("cancel");
        assert_eq!(outcome, CancelOutcome::Flagged);
        assert!(store.cancel_requested(record.id).await.expect("flag"));
        let job = store.get(record.id).await.expect("get").expect("job");
        assert_eq!(job.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn stale_leases_are_released() {
        let store = MemoryJobStore::new();
        let record = job(Priority::Normal);
        store.insert(&record).await.expect("insert");
        store
            .claim_next(Uuid::new_v4(), Duration::from_millis(0))
            .await
            .expect("claim");

        tokio::time::sleep(Duration::from_millis(5)).await;
        let released = store.release_stale().await.expect("release");
        assert_eq!(released, 1);
        let job = store.get(record.id).await.expect("get").expect("job");
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.lease.is_none());
    }

    #[tokio::test]
    async fn requeue_inflight_clears_processing() {
        let store = MemoryJobStore::new();
        for _ in 0..3 {
            store.insert(&job(Priority::Normal)).await.expect("insert");
        }
        for _ in 0..2 {
            store
                .claim_next(Uuid::new_v4(), Duration::from_secs(300))
                .await
                .expect("claim");
        }

        let requeued = store.requeue_inflight().await.expect("requeue");
        assert_eq!(requeued, 2);
        let counts = store.counts().await.expect("counts");
        assert_eq!(counts.processing, 0);
        assert_eq!(counts.pending, 3);
    }
}
