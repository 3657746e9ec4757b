//! Durable background jobs.
//!
//! Producers enqueue through [`JobQueue`]; a fixed [`WorkerPool`] claims
//! jobs atomically (priority first, then age) and runs the registered
//! [`PipelineWorker`] for the job type. Cancellation is cooperative at
//! batch boundaries; clean shutdown leaves no job in `processing`.

mod cancellation;
mod job;
mod queue;
mod status;
mod store;
mod worker;

pub use cancellation::CancellationToken;
pub use job::{JobFilter, JobId, JobRecord, JobType, Priority};
pub use queue::JobQueue;
pub use status::JobStatus;
pub use store::{CancelOutcome, JobCounts, JobStore, MemoryJobStore, PgJobStore};
pub use worker::{PipelineWorker, WorkerContext, WorkerOutcome, WorkerPool};
