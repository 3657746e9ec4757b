//! In-memory store implementations.
//!
//! Used by tests and as the development fallback when no database is
//! configured. Not production safe: nothing survives a restart.

use super::{
    CampaignStore, CompanyStore, ContactStore, EnrichmentCache, EnrolmentStore, FindOrCreate,
    IdempotencyRecord, IdempotencyStore, ManualReviewItem, ManualReviewStore, OutcomeStore,
    Reservation, StoreKind, Stores, SyncLedger, SyncLedgerEntry, ThreadStore,
};
use crate::error::{CoreError, CoreResult};
use crate::model::{
    normalise_email, CampaignInstance, CampaignState, CampaignTemplate, Channel, Company, Contact,
    ConversationMessage, ConversationThread, Enrolment, EnrolmentState, OutreachOutcome,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Bundle of in-memory stores sharing no state with each other.
#[derive(Default)]
pub struct MemoryStores;

impl MemoryStores {
    /// Build a fresh [`Stores`] bundle backed by memory.
    #[must_use]
    pub fn stores() -> Stores {
        Stores {
            kind: StoreKind::Memory,
            contacts: Arc::new(MemoryContactStore::default()),
            companies: Arc::new(MemoryCompanyStore::default()),
            campaigns: Arc::new(MemoryCampaignStore::default()),
            enrolments: Arc::new(MemoryEnrolmentStore::default()),
            outcomes: Arc::new(MemoryOutcomeStore::default()),
            idempotency: Arc::new(MemoryIdempotencyStore::default()),
            threads: Arc::new(MemoryThreadStore::default()),
            enrichment_cache: Arc::new(MemoryEnrichmentCache::default()),
            sync_ledger: Arc::new(MemorySyncLedger::default()),
            manual_review: Arc::new(MemoryManualReviewStore::default()),
        }
    }
}

/// In-memory contacts.
#[derive(Default)]
pub struct MemoryContactStore {
    by_id: RwLock<HashMap<Uuid, Contact>>,
    by_email: RwLock<HashMap<String, Uuid>>,
}

#[async_trait]
impl ContactStore for MemoryContactStore {
    async fn insert_batch(&self, contacts: &[Contact]) -> CoreResult<usize> {
        let mut by_id = self.by_id.write();
        let mut by_email = self.by_email.write();
        let mut inserted = 0;
        for contact in contacts {
            if by_email.contains_key(&contact.email) {
                continue;
            }
            by_email.insert(contact.email.clone(), contact.id);
            by_id.insert(contact.id, contact.clone());
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn get(&self, id: Uuid) -> CoreResult<Option<Contact>> {
        Ok(self.by_id.read().get(&id).cloned())
    }

    async fn get_by_email(&self, email: &str) -> CoreResult<Option<Contact>> {
        let email = normalise_email(email);
        let id = self.by_email.read().get(&email).copied();
        Ok(id.and_then(|id| self.by_id.read().get(&id).cloned()))
    }

    async fn update(&self, contact: &Contact) -> CoreResult<()> {
        let mut by_id = self.by_id.write();
        if !by_id.contains_key(&contact.id) {
            return Err(CoreError::NotFound(format!("contact {}", contact.id)));
        }
        by_id.insert(contact.id, contact.clone());
        Ok(())
    }
}

/// In-memory companies.
#[derive(Default)]
pub struct MemoryCompanyStore {
    by_domain: RwLock<HashMap<String, Company>>,
}

#[async_trait]
impl CompanyStore for MemoryCompanyStore {
    async fn upsert(&self, company: &Company) -> CoreResult<()> {
        self.by_domain
            .write()
            .insert(company.domain.clone(), company.clone());
        Ok(())
    }

    async fn get(&self, domain: &str) -> CoreResult<Option<Company>> {
        Ok(self.by_domain.read().get(domain).cloned())
    }
}

/// In-memory campaigns.
#[derive(Default)]
pub struct MemoryCampaignStore {
    templates: RwLock<HashMap<Uuid, CampaignTemplate>>,
    instances: RwLock<HashMap<Uuid, CampaignInstance>>,
}

#[async_trait]
impl CampaignStore for MemoryCampaignStore {
    async fn insert_template(&self, template: &CampaignTemplate) -> CoreResult<()> {
        self.templates.write().insert(template.id, template.clone());
        Ok(())
    }

    async fn get_template(&self, id: Uuid) -> CoreResult<Option<CampaignTemplate>> {
        Ok(self.templates.read().get(&id).cloned())
    }

    async fn insert_instance(&self, instance: &CampaignInstance) -> CoreResult<()> {
        self.instances.write().insert(instance.id, instance.clone());
        Ok(())
    }

    async fn get_instance(&self, id: Uuid) -> CoreResult<Option<CampaignInstance>> {
        Ok(self.instances.read().get(&id).cloned())
    }

    async fn update_instance_state(&self, id: Uuid, state: CampaignState) -> CoreResult<()> {
        let mut instances = self.instances.write();
        let instance = instances
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("campaign instance {id}")))?;
        instance.state = state;
        instance.updated_at = Utc::now();
        Ok(())
    }
}

/// In-memory enrolments with the `(instance_id, contact_id)` unique index.
///
/// Contact emails are captured at enrolment time so `resolve` can answer
/// `(campaign_id, email)` lookups the way the Postgres join does.
#[derive(Default)]
pub struct MemoryEnrolmentStore {
    by_id: RwLock<HashMap<Uuid, Enrolment>>,
    by_pair: RwLock<HashMap<(Uuid, Uuid), Uuid>>,
    emails: RwLock<HashMap<Uuid, String>>,
}

#[async_trait]
impl EnrolmentStore for MemoryEnrolmentStore {
    async fn find_or_create(
        &self,
        instance_id: Uuid,
        contact: &Contact,
    ) -> CoreResult<FindOrCreate> {
        let contact_id = contact.id;
        self.emails
            .write()
            .insert(contact_id, normalise_email(&contact.email));
        // Single critical section stands in for the DB unique index.
        let mut by_pair = self.by_pair.write();
        if let Some(existing) = by_pair.get(&(instance_id, contact_id)) {
            let enrolment = self
                .by_id
                .read()
                .get(existing)
                .cloned()
                .ok_or_else(|| CoreError::Storage("enrolment index out of sync".to_string()))?;
            return Ok(FindOrCreate {
                enrolment,
                created: false,
            });
        }
        let enrolment = Enrolment::new(instance_id, contact_id);
        by_pair.insert((instance_id, contact_id), enrolment.id);
        self.by_id.write().insert(enrolment.id, enrolment.clone());
        Ok(FindOrCreate {
            enrolment,
            created: true,
        })
    }

    async fn get(&self, id: Uuid) -> CoreResult<Option<Enrolment>> {
        Ok(self.by_id.read().get(&id).cloned())
    }

    async fn resolve(&self, campaign_id: Uuid, email: &str) -> CoreResult<Option<Enrolment>> {
        let email = normalise_email(email);
        let emails = self.emails.read();
        let by_id = self.by_id.read();
        Ok(by_id
            .values()
            .find(|e| {
                e.instance_id == campaign_id
                    && emails.get(&e.contact_id).is_some_and(|m| *m == email)
            })
            .cloned())
    }

    async fn update_state(&self, id: Uuid, state: EnrolmentState) -> CoreResult<()> {
        let mut by_id = self.by_id.write();
        let enrolment = by_id
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("enrolment {id}")))?;
        enrolment.state = state;
        enrolment.updated_at = Utc::now();
        Ok(())
    }
}

/// In-memory outcomes.
#[derive(Default)]
pub struct MemoryOutcomeStore {
    by_id: RwLock<HashMap<Uuid, OutreachOutcome>>,
}

#[async_trait]
impl OutcomeStore for MemoryOutcomeStore {
    async fn insert(&self, outcome: &OutreachOutcome) -> CoreResult<bool> {
        let mut by_id = self.by_id.write();
        let duplicate = by_id
            .values()
            .any(|o| o.provider_message_id == outcome.provider_message_id);
        if duplicate {
            return Ok(false);
        }
        by_id.insert(outcome.id, outcome.clone());
        Ok(true)
    }

    async fn get_by_message_id(
        &self,
        provider_message_id: &str,
    ) -> CoreResult<Option<OutreachOutcome>> {
        Ok(self
            .by_id
            .read()
            .values()
            .find(|o| o.provider_message_id == provider_message_id)
            .cloned())
    }

    async fn latest_for_enrolment(
        &self,
        enrolment_id: Uuid,
    ) -> CoreResult<Option<OutreachOutcome>> {
        Ok(self
            .by_id
            .read()
            .values()
            .filter(|o| o.enrolment_id == enrolment_id)
            .max_by_key(|o| o.sent_at)
            .cloned())
    }

    async fn update(&self, outcome: &OutreachOutcome) -> CoreResult<()> {
        let mut by_id = self.by_id.write();
        if !by_id.contains_key(&outcome.id) {
            return Err(CoreError::NotFound(format!("outcome {}", outcome.id)));
        }
        by_id.insert(outcome.id, outcome.clone());
        Ok(())
    }
}

/// In-memory idempotency records.
#[derive(Default)]
pub struct MemoryIdempotencyStore {
    records: RwLock<HashMap<(String, String), IdempotencyRecord>>,
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn reserve(&self, operation: &str, key: &str) -> CoreResult<Reservation> {
        let mut records = self.records.write();
        let map_key = (operation.to_string(), key.to_string());
        if let Some(existing) = records.get(&map_key) {
            return Ok(Reservation::Existing(existing.clone()));
        }
        records.insert(
            map_key,
            IdempotencyRecord {
                operation: operation.to_string(),
                key: key.to_string(),
                result: serde_json::Value::Null,
                created_at: Utc::now(),
            },
        );
        Ok(Reservation::Acquired)
    }

    async fn fulfil(
        &self,
        operation: &str,
        key: &str,
        result: serde_json::Value,
    ) -> CoreResult<()> {
        let mut records = self.records.write();
        let record = records
            .get_mut(&(operation.to_string(), key.to_string()))
            .ok_or_else(|| CoreError::NotFound(format!("idempotency {operation}/{key}")))?;
        record.result = result;
        Ok(())
    }

    async fn get(&self, operation: &str, key: &str) -> CoreResult<Option<IdempotencyRecord>> {
        Ok(self
            .records
            .read()
            .get(&(operation.to_string(), key.to_string()))
            .cloned())
    }
}

/// In-memory conversation threads.
#[derive(Default)]
pub struct MemoryThreadStore {
    threads: RwLock<HashMap<Uuid, ConversationThread>>,
    by_pair: RwLock<HashMap<(String, Uuid), Uuid>>,
    messages: RwLock<HashMap<Uuid, Vec<ConversationMessage>>>,
}

#[async_trait]
impl ThreadStore for MemoryThreadStore {
    async fn find_or_create(
        &self,
        lead_email: &str,
        campaign_id: Uuid,
        channel: Channel,
    ) -> CoreResult<ConversationThread> {
        let email = normalise_email(lead_email);
        let mut by_pair = self.by_pair.write();
        if let Some(id) = by_pair.get(&(email.clone(), campaign_id)) {
            if let Some(thread) = self.threads.read().get(id) {
                return Ok(thread.clone());
            }
        }
        let thread = ConversationThread::new(&email, campaign_id, channel);
        by_pair.insert((email, campaign_id), thread.id);
        self.threads.write().insert(thread.id, thread.clone());
        Ok(thread)
    }

    async fn get(&self, id: Uuid) -> CoreResult<Option<ConversationThread>> {
        Ok(self.threads.read().get(&id).cloned())
    }

    async fn append_message(&self, message: &ConversationMessage) -> CoreResult<()> {
        if !self.threads.read().contains_key(&message.thread_id) {
            return Err(CoreError::NotFound(format!("thread {}", message.thread_id)));
        }
        self.messages
            .write()
            .entry(message.thread_id)
            .or_default()
            .push(message.clone());
        if let Some(thread) = self.threads.write().get_mut(&message.thread_id) {
            thread.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn recent_messages(
        &self,
        thread_id: Uuid,
        limit: usize,
    ) -> CoreResult<Vec<ConversationMessage>> {
        let messages = self.messages.read();
        let Some(all) = messages.get(&thread_id) else {
            return Ok(Vec::new());
        };
        let skip = all.len().saturating_sub(limit);
        Ok(all.iter().skip(skip).cloned().collect())
    }

    async fn increment_ai_responses(&self, thread_id: Uuid) -> CoreResult<u32> {
        let mut threads = self.threads.write();
        let thread = threads
            .get_mut(&thread_id)
            .ok_or_else(|| CoreError::NotFound(format!("thread {thread_id}")))?;
        thread.ai_responses_count += 1;
        Ok(thread.ai_responses_count)
    }
}

/// In-memory enrichment cache.
#[derive(Default)]
pub struct MemoryEnrichmentCache {
    entries: RwLock<HashMap<(String, String), (chrono::DateTime<Utc>, serde_json::Value)>>,
}

#[async_trait]
impl EnrichmentCache for MemoryEnrichmentCache {
    async fn get(
        &self,
        kind: &str,
        key: &str,
        max_age: Duration,
    ) -> CoreResult<Option<serde_json::Value>> {
        let entries = self.entries.read();
        let Some((cached_at, data)) = entries.get(&(kind.to_string(), key.to_string())) else {
            return Ok(None);
        };
        let age = Utc::now().signed_duration_since(*cached_at);
        if age.num_milliseconds() < 0 {
            return Ok(None);
        }
        let age = Duration::from_millis(age.num_milliseconds().unsigned_abs());
        if age > max_age {
            return Ok(None);
        }
        Ok(Some(data.clone()))
    }

    async fn put(&self, kind: &str, key: &str, data: &serde_json::Value) -> CoreResult<()> {
        self.entries.write().insert(
            (kind.to_string(), key.to_string()),
            (Utc::now(), data.clone()),
        );
        Ok(())
    }
}

/// In-memory CRM sync ledger.
#[derive(Default)]
pub struct MemorySyncLedger {
    entries: RwLock<HashMap<(String, String), SyncLedgerEntry>>,
}

#[async_trait]
impl SyncLedger for MemorySyncLedger {
    async fn record(&self, kind: &str, external_id: &str, status: &str) -> CoreResult<()> {
        self.entries.write().insert(
            (kind.to_string(), external_id.to_string()),
            SyncLedgerEntry {
                kind: kind.to_string(),
                external_id: external_id.to_string(),
                status: status.to_string(),
                synced_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get(&self, kind: &str, external_id: &str) -> CoreResult<Option<SyncLedgerEntry>> {
        Ok(self
            .entries
            .read()
            .get(&(kind.to_string(), external_id.to_string()))
            .cloned())
    }
}

/// In-memory pending manual replies.
#[derive(Default)]
pub struct MemoryManualReviewStore {
    items: RwLock<Vec<ManualReviewItem>>,
}

#[async_trait]
impl ManualReviewStore for MemoryManualReviewStore {
    async fn push(&self, item: &ManualReviewItem) -> CoreResult<()> {
        self.items.write().push(item.clone());
        Ok(())
    }

    async fn list(&self, limit: usize) -> CoreResult<Vec<ManualReviewItem>> {
        let items = self.items.read();
        Ok(items.iter().rev().take(limit).cloned().collect())
    }
}
