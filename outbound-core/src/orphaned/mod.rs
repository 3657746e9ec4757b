//! Orphaned-event retry queue with dead-letter sink.
//!
//! Webhook events can arrive before their enrolment row is visible to the
//! resolver. This module buffers them in a bounded, durable FIFO and retries
//! with backoff until the enrolment appears or the retry budget is spent,
//! at which point the event is promoted to the dead-letter queue for
//! operator replay or discard.

mod dlq;
mod queue;
mod store;

pub use dlq::DeadLetterQueue;
pub use queue::{CycleStats, EventResolver, OrphanedEventQueue, QueueGauges, Resolution};
pub use store::{
    DeadLetterEvent, DeadLetterStore, DlqStatus, MemoryDeadLetterStore, MemoryOrphanedStore,
    OrphanedEvent, OrphanedEventStore, PgDeadLetterStore, PgOrphanedStore,
};
