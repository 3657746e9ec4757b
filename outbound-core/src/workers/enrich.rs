//! Contact enrichment worker.
//!
//! Results stream straight back to the stores; the worker only accumulates
//! aggregate statistics. A content-addressed cache (key = email, 30-day
//! TTL) keeps provider spend flat when the same contacts are re-enriched.

use crate::error::CoreResult;
use crate::jobs::{JobRecord, JobType, PipelineWorker, WorkerContext, WorkerOutcome};
use crate::model::{Company, Contact};
use crate::providers::EnrichmentProvider;
use crate::quality::icp_title_score;
use crate::store::{CompanyStore, ContactStore, EnrichmentCache};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Cache TTL for enrichment payloads.
const CACHE_TTL: Duration = Duration::from_secs(30 * 24 * 3_600);

/// Maximum points the weighted scheme can award.
const MAX_SCORE_POINTS: f64 = 90.0;

/// Enrichment job parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichParams {
    /// Contacts to enrich.
    pub contact_ids: Vec<Uuid>,
}

/// Aggregate enrichment statistics, returned as the job result.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnrichStats {
    /// Contacts processed.
    pub processed: usize,
    /// Contacts answered from the cache.
    pub cache_hits: usize,
    /// Contacts enriched through the provider.
    pub enriched: usize,
    /// Contacts that failed enrichment.
    pub failed: usize,
}

fn payload_str(payload: &serde_json::Value, key: &str) -> Option<String> {
    payload
        .get(key)
        .and_then(serde_json::Value::as_str)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

fn payload_flag(payload: &serde_json::Value, key: &str) -> bool {
    payload
        .get(key)
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false)
}

/// Fold an enrichment payload into the contact's empty fields.
fn apply_contact_payload(contact: &mut Contact, payload: &serde_json::Value) {
    if contact.name.is_none() {
        contact.name = payload_str(payload, "name");
    }
    if contact.title.is_none() {
        contact.title = payload_str(payload, "title");
    }
    if contact.company.is_none() {
        contact.company = payload_str(payload, "company");
    }
    if contact.company_domain.is_none() {
        contact.company_domain = payload_str(payload, "company_domain");
    }
    if contact.linkedin_url.is_none() {
        contact.linkedin_url = payload_str(payload, "linkedin_url");
    }
    if contact.phone.is_none() {
        contact.phone = payload_str(payload, "phone");
    }
    if contact.location.is_none() {
        contact.location = payload_str(payload, "location");
    }
    contact.enrichment = Some(payload.clone());
}

/// Build a company record from an enrichment payload.
fn company_from_payload(domain: &str, payload: &serde_json::Value) -> Company {
    let mut company = Company::new(domain);
    company.name = payload_str(payload, "name");
    company.industry = payload_str(payload, "industry");
    company.revenue = payload.get("revenue").and_then(serde_json::Value::as_i64);
    company.employees = payload.get("employees").and_then(serde_json::Value::as_i64);
    company.technologies = payload
        .get("technologies")
        .and_then(serde_json::Value::as_array)
        .map(|techs| {
            techs
                .iter()
                .filter_map(serde_json::Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default();
    company.funding_stage = payload_str(payload, "funding_stage");
    company.signals = payload
        .get("signals")
        .and_then(serde_json::Value::as_array)
        .map(|signals| {
            signals
                .iter()
                .filter_map(serde_json::Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default();
    company.updated_at = Utc::now();
    company
}

/// Weighted data-quality score in `[0, 1]`.
///
/// Contact signals: verified email 15, title 10, linkedin 10, phone 8,
/// location 7. Company signals: domain 5, revenue 8, employees 5, industry
/// 3, technologies 4, funding 3, signals 2. Provider confidence adds up to
/// 10.
#[must_use]
pub fn compute_quality_score(
    contact: &Contact,
    company: Option<&Company>,
    payload: &serde_json::Value,
) -> f64 {
    let mut points = 0.0;

    if payload_flag(payload, "email_verified") {
        points += 15.0;
    }
    if contact.title.is_some() {
        points += 10.0;
    }
    if contact.linkedin_url.is_some() {
        points += 10.0;
    }
    if contact.phone.is_some() {
        points += 8.0;
    }
    if contact.location.is_some() {
        points += 7.0;
    }

    if contact.company_domain.is_some() {
        points += 5.0;
    }
    if let Some(company) = company {
        if company.revenue.is_some() {
            points += 8.0;
        }
        if company.employees.is_some() {
            points += 5.0;
        }
        if company.industry.is_some() {
            points += 3.0;
        }
        if !company.technologies.is_empty() {
            points += 4.0;
        }
        if company.funding_stage.is_some() {
            points += 3.0;
        }
        if !company.signals.is_empty() {
            points += 2.0;
        }
    }

    let confidence = payload
        .get("confidence")
        .and_then(serde_json::Value::as_f64)
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);
    points += confidence * 10.0;

    (points / MAX_SCORE_POINTS).clamp(0.0, 1.0)
}

/// Enriches contacts and their companies.
pub struct EnrichmentWorker {
    contacts: Arc<dyn ContactStore>,
    companies: Arc<dyn CompanyStore>,
    cache: Arc<dyn EnrichmentCache>,
    provider: Arc<dyn EnrichmentProvider>,
}

impl EnrichmentWorker {
    /// Build the worker.
    #[must_use]
    pub fn new(
        contacts: Arc<dyn ContactStore>,
        companies: Arc<dyn CompanyStore>,
        cache: Arc<dyn EnrichmentCache>,
        provider: Arc<dyn EnrichmentProvider>,
    ) -> Self {
        Self {
            contacts,
            companies,
            cache,
            provider,
        }
    }

    async fn enrich_one(&self, contact_id: Uuid, stats: &mut EnrichStats) -> CoreResult<()> {
        let Some(mut contact) = self.contacts.get(contact_id).await? else {
            warn!(contact_id = %contact_id, "enrichment skipped, contact not found");
            stats.failed += 1;
            return Ok(());
        };
        stats.processed += 1;

        let cached = self
            .cache
            .get("contact", &contact.email, CACHE_TTL)
            .await?;
        let (payload, from_cache) = match cached {
            Some(payload) => (payload, true),
            None => {
                let payload = match self.provider.enrich_contact(&contact.email).await {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!(email = %contact.email, error = %err, "contact enrichment failed");
                        stats.failed += 1;
                        return Ok(());
                    }
                };
                // Upsert semantics keep concurrent enrichers from amplifying
                // writes for the same contact.
                self.cache.put("contact", &contact.email, &payload).await?;
                (payload, false)
            }
        };
        if from_cache {
            stats.cache_hits += 1;
        } else {
            stats.enriched += 1;
        }

        apply_contact_payload(&mut contact, &payload);

        // Company enrichment runs when a domain is known; failures degrade
        // to a contact-only score.
        let company = if let Some(domain) = contact.company_domain.clone() {
            let company_payload = match self.cache.get("company", &domain, CACHE_TTL).await? {
                Some(cached) => Some(cached),
                None => match self.provider.enrich_company(&domain).await {
                    Ok(payload) => {
                        self.cache.put("company", &domain, &payload).await?;
                        Some(payload)
                    }
                    Err(err) => {
                        warn!(domain = %domain, error = %err, "company enrichment failed");
                        None
                    }
                },
            };
            match company_payload {
                Some(payload) => {
                    let company = company_from_payload(&domain, &payload);
                    self.companies.upsert(&company).await?;
                    Some(company)
                }
                None => None,
            }
        } else {
            None
        };

        contact.data_quality_score =
            compute_quality_score(&contact, company.as_ref(), &payload);
        contact.icp_score = icp_title_score(contact.title.as_deref()) / 30.0;
        self.contacts.update(&contact).await?;
        metrics::counter!("contacts_enriched").increment(1);
        Ok(())
    }
}

#[async_trait]
impl PipelineWorker for EnrichmentWorker {
    fn job_type(&self) -> JobType {
        JobType::Enrich
    }

    async fn execute(&self, job: &JobRecord, cx: &WorkerContext) -> CoreResult<WorkerOutcome> {
        let params: EnrichParams = serde_json::from_value(job.params.clone())?;
        let mut stats = EnrichStats::default();

        for chunk in params.contact_ids.chunks(cx.batch_size().max(1)) {
            if cx.should_stop().await? {
                return Ok(WorkerOutcome::Cancelled);
            }
            for contact_id in chunk {
                self.enrich_one(*contact_id, &mut stats).await?;
            }
            let progress = (stats.processed + stats.failed) as f64
                / params.contact_ids.len().max(1) as f64;
            cx.report_progress(progress).await?;
        }

        info!(
            processed = stats.processed,
            cache_hits = stats.cache_hits,
            enriched = stats.enriched,
            failed = stats.failed,
            "enrichment finished"
        );
        Ok(WorkerOutcome::Completed(serde_json::to_value(&stats)?))
    }
}
