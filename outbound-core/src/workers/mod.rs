//! Outreach pipeline workers.
//!
//! Five typed workers behind the job-queue contract: import, enrichment,
//! CRM sync, enrolment and event ingest. All remote traffic goes through
//! the provider layer; cancellation is checked at batch boundaries.

mod crm_sync;
mod enrich;
mod enrol;
mod import;
mod ingest;

pub use crm_sync::{CrmSyncParams, CrmSyncStats, CrmSyncWorker};
pub use enrich::{compute_quality_score, EnrichParams, EnrichStats, EnrichmentWorker};
pub use enrol::{EnrolParams, EnrolStats, EnrolWorker};
pub use import::{ImportParams, ImportRow, ImportStats, ImportWorker};
pub use ingest::{EventIngestor, IngestOutcome};

#[cfg(test)]
pub(crate) fn test_context(
    job: &crate::jobs::JobRecord,
    store: std::sync::Arc<dyn crate::jobs::JobStore>,
) -> crate::jobs::WorkerContext {
    crate::jobs::WorkerContext::detached(job.id, store, 50)
}
