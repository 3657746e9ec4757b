//! Contact import worker.
//!
//! Parses an external contact list, validates and deduplicates rows, then
//! inserts in transactional batches. CSV files are parsed off the async
//! runtime on a blocking thread and streamed through a bounded channel so
//! memory stays flat regardless of file size.

use crate::error::{CoreError, CoreResult};
use crate::jobs::{JobRecord, JobType, PipelineWorker, WorkerContext, WorkerOutcome};
use crate::model::{normalise_email, Contact};
use crate::store::ContactStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;
use validator::ValidateEmail;

/// Import job parameters.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ImportParams {
    /// CSV file to import; the first row must be a header with at least an
    /// `email` column.
    pub csv_path: Option<String>,

    /// Inline rows, for API-driven imports.
    pub contacts: Option<Vec<ImportRow>>,
}

/// One row of an import source.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ImportRow {
    /// Email address; required.
    pub email: String,
    /// Full name.
    pub name: Option<String>,
    /// Job title.
    pub title: Option<String>,
    /// Company name.
    pub company: Option<String>,
    /// Company domain.
    pub company_domain: Option<String>,
    /// LinkedIn profile URL.
    pub linkedin_url: Option<String>,
    /// Phone number.
    pub phone: Option<String>,
    /// Location.
    pub location: Option<String>,
}

/// Aggregate import statistics, returned as the job result.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportStats {
    /// Rows seen in the source.
    pub total_rows: usize,
    /// Rows rejected by validation.
    pub invalid: usize,
    /// Rows dropped as in-batch duplicates.
    pub duplicates: usize,
    /// Rows actually inserted (existing contacts are skipped).
    pub inserted: usize,
    /// Ids of the inserted contacts, for the imported event.
    pub contact_ids: Vec<Uuid>,
}

/// Validate one row; returns the reason when it is rejected.
fn validate_row(row: &ImportRow) -> Result<(), String> {
    let email = normalise_email(&row.email);
    if !email.validate_email() {
        return Err(format!("invalid email syntax {:?}", row.email));
    }
    // A registrable TLD has at least two characters.
    let tld_ok = email
        .rsplit_once('.')
        .is_some_and(|(_, tld)| tld.len() >= 2 && tld.chars().all(char::is_alphabetic));
    if !tld_ok {
        return Err(format!("email {:?} has no valid TLD", row.email));
    }
    Ok(())
}

fn contact_from_row(row: &ImportRow) -> Contact {
    let mut contact = Contact::new(&row.email);
    contact.name = row.name.clone();
    contact.title = row.title.clone();
    contact.company = row.company.clone();
    contact.company_domain = row.company_domain.clone();
    contact.linkedin_url = row.linkedin_url.clone();
    contact.phone = row.phone.clone();
    contact.location = row.location.clone();
    contact
}

/// Imports contacts from CSV files or inline rows.
pub struct ImportWorker {
    contacts: Arc<dyn ContactStore>,
}

impl ImportWorker {
    /// Build the worker.
    #[must_use]
    pub fn new(contacts: Arc<dyn ContactStore>) -> Self {
        Self { contacts }
    }

    /// Stream batches of rows from a CSV file on a blocking thread.
    fn spawn_csv_reader(
        path: String,
        batch_size: usize,
    ) -> mpsc::Receiver<CoreResult<Vec<ImportRow>>> {
        let (tx, rx) = mpsc::channel(2);
        tokio::task::spawn_blocking(move || {
            let mut reader = match csv::Reader::from_path(&path) {
                Ok(reader) => reader,
                Err(err) => {
                    let _ = tx.blocking_send(Err(CoreError::validation(format!(
                        "cannot open {path}: {err}"
                    ))));
                    return;
                }
            };
            let mut batch = Vec::with_capacity(batch_size);
            for record in reader.deserialize::<ImportRow>() {
                match record {
                    Ok(row) => batch.push(row),
                    Err(err) => {
                        // Deserialization failures become invalid rows so the
                        // rest of the file still imports.
                        batch.push(ImportRow {
                            email: format!("<unparseable: {err}>"),
                            ..ImportRow::default()
                        });
                    }
                }
                if batch.len() >= batch_size
                    && tx.blocking_send(Ok(std::mem::take(&mut batch))).is_err()
                {
                    return;
                }
            }
            if !batch.is_empty() {
                let _ = tx.blocking_send(Ok(batch));
            }
        });
        rx
    }

    async fn import_batch(
        &self,
        rows: &[ImportRow],
        seen: &mut HashSet<String>,
        stats: &mut ImportStats,
    ) -> CoreResult<()> {
        let mut valid = Vec::new();
        for row in rows {
            stats.total_rows += 1;
            if let Err(reason) = validate_row(row) {
                warn!(reason, "import row rejected");
                stats.invalid += 1;
                continue;
            }
            let email = normalise_email(&row.email);
            if !seen.insert(email) {
                stats.duplicates += 1;
                continue;
            }
            valid.push(contact_from_row(row));
        }
        if valid.is_empty() {
            return Ok(());
        }

        // All-or-nothing within this batch; a storage failure aborts the job.
        let inserted = self.contacts.insert_batch(&valid).await?;
        stats.inserted += inserted;
        for contact in &valid {
            if self
                .contacts
                .get_by_email(&contact.email)
                .await?
                .is_some_and(|existing| existing.id == contact.id)
            {
                stats.contact_ids.push(contact.id);
            }
        }
        metrics::counter!("contacts_imported").increment(inserted as u64);
        Ok(())
    }
}

#[async_trait]
impl PipelineWorker for ImportWorker {
    fn job_type(&self) -> JobType {
        JobType::Import
    }

    async fn execute(&self, job: &JobRecord, cx: &WorkerContext) -> CoreResult<WorkerOutcome> {
        let params: ImportParams = serde_json::from_value(job.params.clone())?;
        let mut stats = ImportStats::default();
        let mut seen: HashSet<String> = HashSet::new();

        if let Some(rows) = &params.contacts {
            for chunk in rows.chunks(cx.batch_size().max(1)) {
                if cx.should_stop().await? {
                    return Ok(WorkerOutcome::Cancelled);
                }
                self.import_batch(chunk, &mut seen, &mut stats).await?;
                let progress = stats.total_rows as f64 / rows.len().max(1) as f64;
                cx.report_progress(progress).await?;
            }
        } else if let Some(path) = &params.csv_path {
            let mut batches = Self::spawn_csv_reader(path.clone(), cx.batch_size().max(1));
            while let Some(batch) = batches.recv().await {
                if cx.should_stop().await? {
                    return Ok(WorkerOutcome::Cancelled);
                }
                let batch = batch?;
                self.import_batch(&batch, &mut seen, &mut stats).await?;
                cx.report_progress(0.5).await?;
            }
            cx.report_progress(1.0).await?;
        } else {
            return Err(CoreError::validation(
                "import requires csv_path or inline contacts",
            ));
        }

        info!(
            total = stats.total_rows,
            inserted = stats.inserted,
            invalid = stats.invalid,
            duplicates = stats.duplicates,
            "contacts imported"
        );
        Ok(WorkerOutcome::Completed(serde_json::to_value(&stats)?))
    }
}
