//! Dead-letter queue admin surface.

use super::queue::OrphanedEventQueue;
use super::store::{DeadLetterEvent, DeadLetterStore, DlqStatus};
use crate::error::{CoreError, CoreResult};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Operator surface over the dead-letter store.
#[derive(Clone)]
pub struct DeadLetterQueue {
    store: Arc<dyn DeadLetterStore>,
    orphaned: OrphanedEventQueue,
}

impl DeadLetterQueue {
    /// Build the admin surface.
    #[must_use]
    pub fn new(store: Arc<dyn DeadLetterStore>, orphaned: OrphanedEventQueue) -> Self {
        Self { store, orphaned }
    }

    /// List entries, newest first.
    pub async fn list(
        &self,
        limit: usize,
        offset: usize,
        status: Option<DlqStatus>,
    ) -> CoreResult<Vec<DeadLetterEvent>> {
        self.store.list(limit, offset, status).await
    }

    /// Fetch one entry.
    pub async fn get(&self, id: Uuid) -> CoreResult<Option<DeadLetterEvent>> {
        self.store.get(id).await
    }

    /// Re-enqueue an entry into the orphaned queue with its attempts reset.
    ///
    /// Replay is idempotent with respect to the downstream handler through
    /// the event's stable id.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] for an unknown id.
    pub async fn replay(&self, id: Uuid) -> CoreResult<()> {
        let entry = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("dead-letter event {id}")))?;
        self.orphaned.enqueue(entry.event).await?;
        self.store.set_status(id, DlqStatus::Replayed).await?;
        metrics::counter!("dlq_replays").increment(1);
        info!(event_id = %id, "dead-letter event replayed");
        Ok(())
    }

    /// Mark an entry discarded.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] for an unknown id.
    pub async fn discard(&self, id: Uuid) -> CoreResult<()> {
        self.store.set_status(id, DlqStatus::Discarded).await?;
        metrics::counter!("dlq_discards").increment(1);
        info!(event_id = %id, "dead-letter event discarded");
        Ok(())
    }
}
