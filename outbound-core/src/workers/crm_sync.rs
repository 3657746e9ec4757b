//! CRM synchronisation worker.

use crate::error::{CoreError, CoreResult};
use crate::jobs::{JobRecord, JobType, PipelineWorker, WorkerContext, WorkerOutcome};
use crate::model::Contact;
use crate::providers::{CrmProvider, MAX_CRM_BATCH};
use crate::store::{ContactStore, SyncLedger};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// CRM sync job parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmSyncParams {
    /// Contacts to push.
    pub contact_ids: Vec<Uuid>,

    /// Keep syncing when individual items fail inside a batch.
    #[serde(default = "default_continue_on_error")]
    pub continue_on_error: bool,
}

const fn default_continue_on_error() -> bool {
    true
}

/// Aggregate sync statistics, returned as the job result.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CrmSyncStats {
    /// Contacts pushed successfully.
    pub synced: usize,
    /// Contacts the CRM rejected.
    pub failed: usize,
    /// Contacts missing locally.
    pub missing: usize,
}

/// Pushes contacts into the CRM in batches, recording each sync in the
/// ledger.
pub struct CrmSyncWorker {
    contacts: Arc<dyn ContactStore>,
    ledger: Arc<dyn SyncLedger>,
    crm: Arc<dyn CrmProvider>,
}

impl CrmSyncWorker {
    /// Build the worker.
    #[must_use]
    pub fn new(
        contacts: Arc<dyn ContactStore>,
        ledger: Arc<dyn SyncLedger>,
        crm: Arc<dyn CrmProvider>,
    ) -> Self {
        Self {
            contacts,
            ledger,
            crm,
        }
    }

    async fn sync_batch(
        &self,
        batch: &[Contact],
        continue_on_error: bool,
        stats: &mut CrmSyncStats,
    ) -> CoreResult<()> {
        let results = self.crm.upsert_batch(batch).await?;
        for (contact, result) in batch.iter().zip(results) {
            match result {
                Ok(external_id) => {
                    self.ledger
                        .record("contact", &external_id, "synced")
                        .await?;
                    // Data-quality context lands in the CRM timeline.
                    let note = format!(
                        "Synced from outbound pipeline (data quality {:.2})",
                        contact.data_quality_score
                    );
                    if let Err(err) = self.crm.log_activity(&external_id, &note).await {
                        warn!(email = %contact.email, error = %err, "activity log failed");
                    }
                    stats.synced += 1;
                }
                Err(err) => {
                    warn!(email = %contact.email, error = %err, "crm rejected contact");
                    stats.failed += 1;
                    if !continue_on_error {
                        return Err(err);
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PipelineWorker for CrmSyncWorker {
    fn job_type(&self) -> JobType {
        JobType::CrmSync
    }

    async fn execute(&self, job: &JobRecord, cx: &WorkerContext) -> CoreResult<WorkerOutcome> {
        let params: CrmSyncParams = serde_json::from_value(job.params.clone())?;
        let mut stats = CrmSyncStats::default();

        let chunk_size = MAX_CRM_BATCH.min(cx.batch_size().max(1));
        let mut processed = 0_usize;
        for chunk in params.contact_ids.chunks(chunk_size) {
            if cx.should_stop().await? {
                return Ok(WorkerOutcome::Cancelled);
            }

            let mut batch = Vec::with_capacity(chunk.len());
            for contact_id in chunk {
                match self.contacts.get(*contact_id).await? {
                    Some(contact) => batch.push(contact),
                    None => stats.missing += 1,
                }
            }
            if !batch.is_empty() {
                self.sync_batch(&batch, params.continue_on_error, &mut stats)
                    .await?;
            }

            processed += chunk.len();
            cx.report_progress(processed as f64 / params.contact_ids.len().max(1) as f64)
                .await?;
        }

        metrics::counter!("crm_contacts_synced").increment(stats.synced as u64);
        info!(
            synced = stats.synced,
            failed = stats.failed,
            missing = stats.missing,
            "crm sync finished"
        );
        Ok(WorkerOutcome::Completed(serde_json::to_value(&stats)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobRecord, JobStore, MemoryJobStore, Priority};
    use crate::store::MemoryStores;
    use parking_lot::Mutex;
    use serde_json::json;

    /// CRM double that rejects configured emails.
    #[derive(Default)]
    struct SelectiveCrm {
        reject: Vec<String>,
        activities: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CrmProvider for SelectiveCrm {
        fn name(&self) -> &'static str {
            "selective"
        }

        async fn upsert_contact(&self, contact: &Contact) -> CoreResult<String> {
            Ok(format!("crm-{}", contact.email))
        }

        async fn upsert_batch(
            &self,
            contacts: &[Contact],
        ) -> CoreResult<Vec<CoreResult<String>>> {
            Ok(contacts
                .iter()
                .map(|c| {
                    if self.reject.contains(&c.email) {
                        Err(CoreError::PermanentRemote {
                            status: 422,
                            detail: "rejected".to_string(),
                        })
                    } else {
                        Ok(format!("crm-{}", c.email))
                    }
                })
                .collect())
        }

        async fn log_activity(&self, external_id: &str, _note: &str) -> CoreResult<()> {
            self.activities.lock().push(external_id.to_string());
            Ok(())
        }

        async fn search(&self, _query: &str) -> CoreResult<Vec<serde_json::Value>> {
            Ok(Vec::new())
        }
    }

    async fn run(
        stores: &crate::store::Stores,
        crm: Arc<SelectiveCrm>,
        params: serde_json::Value,
    ) -> CoreResult<CrmSyncStats> {
        let worker = CrmSyncWorker::new(stores.contacts.clone(), stores.sync_ledger.clone(), crm);
        let job = JobRecord::new(JobType::CrmSync, params, Priority::Normal);
        let job_store = Arc::new(MemoryJobStore::new());
        job_store.insert(&job).await.expect("insert job");
        let cx = crate::workers::test_context(&job, job_store);
        match worker.execute(&job, &cx).await? {
            WorkerOutcome::Completed(result) => {
                Ok(serde_json::from_value(result).expect("stats"))
            }
            WorkerOutcome::Cancelled => panic!("unexpected cancellation"),
        }
    }

    async fn seed(stores: &crate::store::Stores, emails: &[&str]) -> Vec<Uuid> {
        let contacts: Vec<Contact> = emails.iter().map(|e| Contact::new(e)).collect();
        let ids = contacts.iter().map(|c| c.id).collect();
        stores.contacts.insert_batch(&contacts).await.expect("seed");
        ids
    }

    #[tokio::test]
    async fn synced_contacts_land_in_the_ledger_with_activity() {
        let stores = MemoryStores::stores();
        let ids = seed(&stores, &["a@ex.com", "b@ex.com"]).await;
        let crm = Arc::new(SelectiveCrm::default());

        let stats = run(&stores, crm.clone(), json!({ "contact_ids": ids }))
            .await
            .expect("run");
        assert_eq!(stats.synced, 2);

        let entry = stores
            .sync_ledger
            .get("contact", "crm-a@ex.com")
            .await
            .expect("get")
            .expect("entry");
        assert_eq!(entry.status, "synced");
        assert_eq!(crm.activities.lock().len(), 2);
    }

    #[tokio::test]
    async fn continue_on_error_keeps_going_past_rejections() {
        let stores = MemoryStores::stores();
        let ids = seed(&stores, &["good@ex.com", "bad@ex.com", "also@ex.com"]).await;
        let crm = Arc::new(SelectiveCrm {
            reject: vec!["bad@ex.com".to_string()],
            ..SelectiveCrm::default()
        });

        let stats = run(&stores, crm, json!({ "contact_ids": ids }))
            .await
            .expect("run");
        assert_eq!(stats.synced, 2);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn strict_mode_fails_the_job_on_first_rejection() {
        let stores = MemoryStores::stores();
        let ids = seed(&stores, &["good@ex.com", "bad@ex.com"]).await;
        let crm = Arc::new(SelectiveCrm {
            reject: vec!["bad@ex.com".to_string()],
            ..SelectiveCrm::default()
        });

        let result = run(
            &stores,
            crm,
            json!({ "contact_ids": ids, "continue_on_error": false }),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn missing_contacts_are_counted() {
        let stores = MemoryStores::stores();
        let crm = Arc::new(SelectiveCrm::default());
        let stats = run(
            &stores,
            crm,
            json!({ "contact_ids": [Uuid::new_v4()] }),
        )
        .await
        .expect("run");
        assert_eq!(stats.missing, 1);
        assert_eq!(stats.synced, 0);
    }
}
