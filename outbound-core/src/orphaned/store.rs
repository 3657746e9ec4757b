//! Storage for orphaned events and the dead-letter sink.

use crate::error::{CoreError, CoreResult};
use crate::model::NormalizedEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::collections::VecDeque;
use uuid::Uuid;

/// A webhook event waiting for its enrolment to become visible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrphanedEvent {
    /// The buffered event; its id is the queue key.
    pub event: NormalizedEvent,

    /// Failed resolution attempts so far.
    pub attempts: u32,

    /// When the event becomes ready for its next attempt.
    pub next_retry_at: DateTime<Utc>,

    /// Insertion timestamp; the queue is FIFO over this.
    pub queued_at: DateTime<Utc>,

    /// First resolution attempt, for the DLQ record.
    pub first_attempted_at: Option<DateTime<Utc>>,

    /// Latest resolution attempt.
    pub last_attempted_at: Option<DateTime<Utc>>,
}

/// Status of a dead-letter entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DlqStatus {
    /// Landed after exhausting retries; awaiting an operator.
    Failed,
    /// Re-enqueued into the orphaned queue.
    Replayed,
    /// Dropped by an operator.
    Discarded,
}

impl DlqStatus {
    /// Lowercase status name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Failed => "failed",
            Self::Replayed => "replayed",
            Self::Discarded => "discarded",
        }
    }
}

impl std::str::FromStr for DlqStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "failed" => Ok(Self::Failed),
            "replayed" => Ok(Self::Replayed),
            "discarded" => Ok(Self::Discarded),
            other => Err(CoreError::validation(format!(
                "unknown dlq status {other:?}"
            ))),
        }
    }
}

/// An event that exhausted its retry budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEvent {
    /// Same id as the orphaned event (stable across replays).
    pub id: Uuid,

    /// Original event payload.
    pub event: NormalizedEvent,

    /// Attempts made before promotion.
    pub attempts: u32,

    /// Why the event could not be resolved.
    pub failure_reason: String,

    /// First resolution attempt.
    pub first_attempted_at: Option<DateTime<Utc>>,

    /// Last resolution attempt.
    pub last_attempted_at: Option<DateTime<Utc>>,

    /// Entry status.
    pub status: DlqStatus,

    /// Promotion timestamp.
    pub created_at: DateTime<Utc>,
}

/// Bounded, durable FIFO of orphaned events.
#[async_trait]
pub trait OrphanedEventStore: Send + Sync {
    /// Insert an event; when the queue is at `max_size`, evict the oldest
    /// entry and return its id.
    async fn insert_bounded(
        &self,
        event: &OrphanedEvent,
        max_size: usize,
    ) -> CoreResult<Option<Uuid>>;

    /// Events ready for retry at `now`, FIFO by `queued_at`, capped at
    /// `limit`.
    async fn ready(&self, now: DateTime<Utc>, limit: usize) -> CoreResult<Vec<OrphanedEvent>>;

    /// Remove an event; returns whether it was present.
    async fn remove(&self, id: Uuid) -> CoreResult<bool>;

    /// Persist attempt bookkeeping after a failed resolution.
    async fn reschedule(
        &self,
        id: Uuid,
        attempts: u32,
        next_retry_at: DateTime<Utc>,
        attempted_at: DateTime<Utc>,
    ) -> CoreResult<()>;

    /// Current queue size.
    async fn len(&self) -> CoreResult<usize>;

    /// Events ready for retry at `now`.
    async fn ready_count(&self, now: DateTime<Utc>) -> CoreResult<usize>;

    /// Events queued before `cutoff`.
    async fn stale_count(&self, cutoff: DateTime<Utc>) -> CoreResult<usize>;
}

/// Durable dead-letter sink.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Persist a promoted event.
    async fn insert(&self, entry: &DeadLetterEvent) -> CoreResult<()>;

    /// Fetch an entry.
    async fn get(&self, id: Uuid) -> CoreResult<Option<DeadLetterEvent>>;

    /// List entries, newest first, optionally filtered by status.
    async fn list(
        &self,
        limit: usize,
        offset: usize,
        status: Option<DlqStatus>,
    ) -> CoreResult<Vec<DeadLetterEvent>>;

    /// Update an entry's status.
    async fn set_status(&self, id: Uuid, status: DlqStatus) -> CoreResult<()>;
}

/// In-memory orphaned-event store (development fallback, tests).
#[derive(Default)]
pub struct MemoryOrphanedStore {
    events: Mutex<VecDeque<OrphanedEvent>>,
}

impl MemoryOrphanedStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrphanedEventStore for MemoryOrphanedStore {
    async fn insert_bounded(
        &self,
        event: &OrphanedEvent,
        max_size: usize,
    ) -> CoreResult<Option<Uuid>> {
        let mut events = self.events.lock();
        let evicted = if events.len() >= max_size {
            events.pop_front().map(|e| e.event.id)
        } else {
            None
        };
        events.push_back(event.clone());
        Ok(evicted)
    }

    async fn ready(&self, now: DateTime<Utc>, limit: usize) -> CoreResult<Vec<OrphanedEvent>> {
        let events = self.events.lock();
        Ok(events
            .iter()
            .filter(|e| e.next_retry_at <= now)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn remove(&self, id: Uuid) -> CoreResult<bool> {
        let mut events = self.events.lock();
        let before = events.len();
        events.retain(|e| e.event.id != id);
        Ok(events.len() < before)
    }

    async fn reschedule(
        &self,
        id: Uuid,
        attempts: u32,
        next_retry_at: DateTime<Utc>,
        attempted_at: DateTime<Utc>,
    ) -> CoreResult<()> {
        let mut events = self.events.lock();
        let event = events
            .iter_mut()
            .find(|e| e.event.id == id)
            .ok_or_else(|| CoreError::NotFound(format!("orphaned event {id}")))?;
        event.attempts = attempts;
        event.next_retry_at = next_retry_at;
        event.first_attempted_at.get_or_insert(attempted_at);
        event.last_attempted_at = Some(attempted_at);
        Ok(())
    }

    async fn len(&self) -> CoreResult<usize> {
        Ok(self.events.lock().len())
    }

    async fn ready_count(&self, now: DateTime<Utc>) -> CoreResult<usize> {
        Ok(self
            .events
            .lock()
            .iter()
            .filter(|e| e.next_retry_at <= now)
            .count())
    }

    async fn stale_count(&self, cutoff: DateTime<Utc>) -> CoreResult<usize> {
        Ok(self
            .events
            .lock()
            .iter()
            .filter(|e| e.queued_at < cutoff)
            .count())
    }
}

/// In-memory dead-letter store.
#[derive(Default)]
pub struct MemoryDeadLetterStore {
    entries: Mutex<Vec<DeadLetterEvent>>,
}

impl MemoryDeadLetterStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeadLetterStore for MemoryDeadLetterStore {
    async fn insert(&self, entry: &DeadLetterEvent) -> CoreResult<()> {
        self.entries.lock().push(entry.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> CoreResult<Option<DeadLetterEvent>> {
        Ok(self.entries.lock().iter().find(|e| e.id == id).cloned())
    }

    async fn list(
        &self,
        limit: usize,
        offset: usize,
        status: Option<DlqStatus>,
    ) -> CoreResult<Vec<DeadLetterEvent>> {
        let entries = self.entries.lock();
        Ok(entries
            .iter()
            .rev()
            .filter(|e| status.is_none_or(|s| e.status == s))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn set_status(&self, id: Uuid, status: DlqStatus) -> CoreResult<()> {
        let mut entries = self.entries.lock();
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| CoreError::NotFound(format!("dead-letter event {id}")))?;
        entry.status = status;
        Ok(())
    }
}

/// Postgres orphaned-event store.
pub struct PgOrphanedStore {
    pool: PgPool,
}

impl PgOrphanedStore {
    /// Build from a pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn orphaned_from_row(row: &sqlx::postgres::PgRow) -> CoreResult<OrphanedEvent> {
    let event: serde_json::Value = row.try_get("event_data")?;
    Ok(OrphanedEvent {
        event: serde_json::from_value(event)
            .map_err(|e| CoreError::Storage(format!("corrupt orphaned event: {e}")))?,
        attempts: u32::try_from(row.try_get::<i32, _>("attempts")?).unwrap_or(0),
        next_retry_at: row.try_get("next_retry_at")?,
        queued_at: row.try_get("queued_at")?,
        first_attempted_at: row.try_get("first_attempted_at")?,
        last_attempted_at: row.try_get("last_attempted_at")?,
    })
}

#[async_trait]
impl OrphanedEventStore for PgOrphanedStore {
    async fn insert_bounded(
        &self,
        event: &OrphanedEvent,
        max_size: usize,
    ) -> CoreResult<Option<Uuid>> {
        let mut txn = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO orphaned_events (id, event_data, attempts, next_retry_at, queued_at, \
             first_attempted_at, last_attempted_at) VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(event.event.id)
        .bind(serde_json::to_value(&event.event)?)
        .bind(i32::try_from(event.attempts).unwrap_or(0))
        .bind(event.next_retry_at)
        .bind(event.queued_at)
        .bind(event.first_attempted_at)
        .bind(event.last_attempted_at)
        .execute(&mut *txn)
        .await?;

        let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM orphaned_events")
            .fetch_one(&mut *txn)
            .await?
            .try_get("n")?;
        let evicted = if usize::try_from(count).unwrap_or(0) > max_size {
            let row = sqlx::query(
                "DELETE FROM orphaned_events WHERE id = (\
                     SELECT id FROM orphaned_events ORDER BY queued_at ASC LIMIT 1\
                 ) RETURNING id",
            )
            .fetch_optional(&mut *txn)
            .await?;
            row.map(|r| r.try_get("id")).transpose()?
        } else {
            None
        };
        txn.commit().await?;
        Ok(evicted)
    }

    async fn ready(&self, now: DateTime<Utc>, limit: usize) -> CoreResult<Vec<OrphanedEvent>> {
        let rows = sqlx::query(
            "SELECT id, event_data, attempts, next_retry_at, queued_at, first_attempted_at, \
             last_attempted_at FROM orphaned_events WHERE next_retry_at <= $1 \
             ORDER BY queued_at ASC LIMIT $2",
        )
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(50))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(orphaned_from_row).collect()
    }

    async fn remove(&self, id: Uuid) -> CoreResult<bool> {
        let result = sqlx::query("DELETE FROM orphaned_events WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn reschedule(
        &self,
        id: Uuid,
        attempts: u32,
        next_retry_at: DateTime<Utc>,
        attempted_at: DateTime<Utc>,
    ) -> CoreResult<()> {
        sqlx::query(
            "UPDATE orphaned_events SET attempts = $2, next_retry_at = $3, \
             first_attempted_at = COALESCE(first_attempted_at, $4), last_attempted_at = $4 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(i32::try_from(attempts).unwrap_or(0))
        .bind(next_retry_at)
        .bind(attempted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn len(&self) -> CoreResult<usize> {
        let n: i64 = sqlx::query("SELECT COUNT(*) AS n FROM orphaned_events")
            .fetch_one(&self.pool)
            .await?
            .try_get("n")?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    async fn ready_count(&self, now: DateTime<Utc>) -> CoreResult<usize> {
        let n: i64 =
            sqlx::query("SELECT COUNT(*) AS n FROM orphaned_events WHERE next_retry_at <= $1")
                .bind(now)
                .fetch_one(&self.pool)
                .await?
                .try_get("n")?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    async fn stale_count(&self, cutoff: DateTime<Utc>) -> CoreResult<usize> {
        let n: i64 = sqlx::query("SELECT COUNT(*) AS n FROM orphaned_events WHERE queued_at < $1")
            .bind(cutoff)
            .fetch_one(&self.pool)
            .await?
            .try_get("n")?;
        Ok(usize::try_from(n).unwrap_or(0))
    }
}

/// Postgres dead-letter store.
pub struct PgDeadLetterStore {
    pool: PgPool,
}

impl PgDeadLetterStore {
    /// Build from a pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn dlq_from_row(row: &sqlx::postgres::PgRow) -> CoreResult<DeadLetterEvent> {
    let event: serde_json::Value = row.try_get("event_data")?;
    let status: String = row.try_get("status")?;
    Ok(DeadLetterEvent {
        id: row.try_get("id")?,
        event: serde_json::from_value(event)
            .map_err(|e| CoreError::Storage(format!("corrupt dead-letter event: {e}")))?,
        attempts: u32::try_from(row.try_get::<i32, _>("attempts")?).unwrap_or(0),
        failure_reason: row.try_get("failure_reason")?,
        first_attempted_at: row.try_get("first_attempted_at")?,
        last_attempted_at: row.try_get("last_attempted_at")?,
        status: status.parse()?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl DeadLetterStore for PgDeadLetterStore {
    async fn insert(&self, entry: &DeadLetterEvent) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO dead_letter_events (id, event_data, attempts, failure_reason, \
             first_attempted_at, last_attempted_at, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (id) DO UPDATE SET attempts = EXCLUDED.attempts, \
             failure_reason = EXCLUDED.failure_reason, \
             last_attempted_at = EXCLUDED.last_attempted_at, status = EXCLUDED.status",
        )
        .bind(entry.id)
        .bind(serde_json::to_value(&entry.event)?)
        .bind(i32::try_from(entry.attempts).unwrap_or(0))
        .bind(&entry.failure_reason)
        .bind(entry.first_attempted_at)
        .bind(entry.last_attempted_at)
        .bind(entry.status.name())
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> CoreResult<Option<DeadLetterEvent>> {
        let row = sqlx::query(
            "SELECT id, event_data, attempts, failure_reason, first_attempted_at, \
             last_attempted_at, status, created_at FROM dead_letter_events WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(dlq_from_row).transpose()
    }

    async fn list(
        &self,
        limit: usize,
        offset: usize,
        status: Option<DlqStatus>,
    ) -> CoreResult<Vec<DeadLetterEvent>> {
        let rows = sqlx::query(
            "SELECT id, event_data, attempts, failure_reason, first_attempted_at, \
             last_attempted_at, status, created_at FROM dead_letter_events \
             WHERE ($3::text IS NULL OR status = $3) \
             ORDER BY created_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(i64::try_from(limit).unwrap_or(50))
        .bind(i64::try_from(offset).unwrap_or(0))
        .bind(status.map(|s| s.name().to_string()))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(dlq_from_row).collect()
    }

    async fn set_status(&self, id: Uuid, status: DlqStatus) -> CoreResult<()> {
        let result = sqlx::query("UPDATE dead_letter_events SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.name())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("dead-letter event {id}")));
        }
        Ok(())
    }
}
