//! Persistence capabilities.
//!
//! Each concern gets an explicit store trait. Two implementations exist for
//! every trait: Postgres (sqlx) for production and an in-memory one used for
//! the development fallback and tests. Workers and services only ever hold
//! `Arc<dyn …Store>`, so a fresh runtime in a test swaps the whole layer.

mod memory;
mod postgres;

pub use memory::MemoryStores;
pub use postgres::PgStores;

use crate::error::CoreResult;
use crate::model::{
    CampaignInstance, CampaignState, CampaignTemplate, Company, Contact, ConversationMessage,
    ConversationThread, Enrolment, OutreachOutcome,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Contacts, keyed by normalised email.
#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Insert a batch atomically with `ON CONFLICT DO NOTHING` semantics.
    ///
    /// Returns the number of rows actually inserted. Any persistence error
    /// rolls the whole batch back ([`crate::error::CoreError::DataLossHazard`]).
    async fn insert_batch(&self, contacts: &[Contact]) -> CoreResult<usize>;

    /// Fetch by id.
    async fn get(&self, id: Uuid) -> CoreResult<Option<Contact>>;

    /// Fetch by normalised email.
    async fn get_by_email(&self, email: &str) -> CoreResult<Option<Contact>>;

    /// Persist mutated attributes (enrichment, scores).
    async fn update(&self, contact: &Contact) -> CoreResult<()>;
}

/// Companies, keyed by domain.
#[async_trait]
pub trait CompanyStore: Send + Sync {
    /// Insert or update a company record.
    async fn upsert(&self, company: &Company) -> CoreResult<()>;

    /// Fetch by domain.
    async fn get(&self, domain: &str) -> CoreResult<Option<Company>>;
}

/// Campaign templates and instances.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    /// Persist a template.
    async fn insert_template(&self, template: &CampaignTemplate) -> CoreResult<()>;

    /// Fetch a template.
    async fn get_template(&self, id: Uuid) -> CoreResult<Option<CampaignTemplate>>;

    /// Persist a launched instance.
    async fn insert_instance(&self, instance: &CampaignInstance) -> CoreResult<()>;

    /// Fetch an instance.
    async fn get_instance(&self, id: Uuid) -> CoreResult<Option<CampaignInstance>>;

    /// Persist an instance state change.
    async fn update_instance_state(&self, id: Uuid, state: CampaignState) -> CoreResult<()>;
}

/// Result of [`EnrolmentStore::find_or_create`].
#[derive(Debug, Clone)]
pub struct FindOrCreate {
    /// The enrolment row, existing or fresh.
    pub enrolment: Enrolment,
    /// Whether this call created it.
    pub created: bool,
}

/// Enrolments, unique on `(instance_id, contact_id)`.
#[async_trait]
pub trait EnrolmentStore: Send + Sync {
    /// Atomically find or create the enrolment for `(instance_id,
    /// contact.id)`. Backed by the unique index; concurrent callers all
    /// receive the same row.
    async fn find_or_create(&self, instance_id: Uuid, contact: &Contact)
        -> CoreResult<FindOrCreate>;

    /// Fetch by id.
    async fn get(&self, id: Uuid) -> CoreResult<Option<Enrolment>>;

    /// Resolve an enrolment from a webhook's `(campaign_id, email)` pair.
    async fn resolve(&self, campaign_id: Uuid, email: &str) -> CoreResult<Option<Enrolment>>;

    /// Persist a state change.
    async fn update_state(
        &self,
        id: Uuid,
        state: crate::model::EnrolmentState,
    ) -> CoreResult<()>;
}

/// Outreach outcomes, one per sent message.
#[async_trait]
pub trait OutcomeStore: Send + Sync {
    /// Persist a fresh outcome row; a row with the same provider message id
    /// already present makes this a no-op. Returns whether a row was
    /// inserted.
    async fn insert(&self, outcome: &OutreachOutcome) -> CoreResult<bool>;

    /// Fetch by provider message id.
    async fn get_by_message_id(&self, provider_message_id: &str)
        -> CoreResult<Option<OutreachOutcome>>;

    /// Latest outcome for an enrolment, by `sent_at`.
    async fn latest_for_enrolment(&self, enrolment_id: Uuid)
        -> CoreResult<Option<OutreachOutcome>>;

    /// Persist counter/flag mutations.
    async fn update(&self, outcome: &OutreachOutcome) -> CoreResult<()>;
}

/// A persisted `(operation, key) → result` record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Operation name, e.g. `enrol_send`.
    pub operation: String,
    /// Deterministically derived key.
    pub key: String,
    /// Recorded result; `Null` while the operation is still in flight.
    pub result: serde_json::Value,
    /// Reservation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Outcome of an idempotency reservation attempt.
#[derive(Debug, Clone)]
pub enum Reservation {
    /// This caller holds the reservation and must perform the side effect.
    Acquired,
    /// Another caller already reserved (or completed) the operation.
    Existing(IdempotencyRecord),
}

/// Makes externally-visible side effects safely retryable.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Insert-if-absent a reservation for `(operation, key)`.
    ///
    /// Exactly one concurrent caller acquires it; everyone else observes the
    /// existing record.
    async fn reserve(&self, operation: &str, key: &str) -> CoreResult<Reservation>;

    /// Record the result for a held reservation.
    async fn fulfil(
        &self,
        operation: &str,
        key: &str,
        result: serde_json::Value,
    ) -> CoreResult<()>;

    /// Fetch a record.
    async fn get(&self, operation: &str, key: &str) -> CoreResult<Option<IdempotencyRecord>>;
}

/// Conversation threads and messages.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Find or create the thread for `(lead_email, campaign_id)`.
    async fn find_or_create(
        &self,
        lead_email: &str,
        campaign_id: Uuid,
        channel: crate::model::Channel,
    ) -> CoreResult<ConversationThread>;

    /// Fetch a thread.
    async fn get(&self, id: Uuid) -> CoreResult<Option<ConversationThread>>;

    /// Append a message to its thread.
    async fn append_message(&self, message: &ConversationMessage) -> CoreResult<()>;

    /// Most recent messages, oldest first, capped at `limit`.
    async fn recent_messages(
        &self,
        thread_id: Uuid,
        limit: usize,
    ) -> CoreResult<Vec<ConversationMessage>>;

    /// Increment the durable AI-response counter; returns the new value.
    async fn increment_ai_responses(&self, thread_id: Uuid) -> CoreResult<u32>;
}

/// Content-addressed enrichment cache.
#[async_trait]
pub trait EnrichmentCache: Send + Sync {
    /// Fetch a cached blob no older than `max_age`.
    async fn get(
        &self,
        kind: &str,
        key: &str,
        max_age: Duration,
    ) -> CoreResult<Option<serde_json::Value>>;

    /// Upsert a blob, refreshing its timestamp. Upsert semantics avoid
    /// write amplification when two workers enrich the same contact.
    async fn put(&self, kind: &str, key: &str, data: &serde_json::Value) -> CoreResult<()>;
}

/// One CRM sync ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncLedgerEntry {
    /// Record kind (`contact`, `company`).
    pub kind: String,
    /// Id of the record in the external CRM.
    pub external_id: String,
    /// Sync status.
    pub status: String,
    /// Last sync timestamp.
    pub synced_at: DateTime<Utc>,
}

/// Ledger of records pushed to the CRM.
#[async_trait]
pub trait SyncLedger: Send + Sync {
    /// Upsert a ledger entry keyed by `(kind, external_id)`.
    async fn record(&self, kind: &str, external_id: &str, status: &str) -> CoreResult<()>;

    /// Fetch an entry.
    async fn get(&self, kind: &str, external_id: &str) -> CoreResult<Option<SyncLedgerEntry>>;
}

/// A reply the responder could not answer automatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualReviewItem {
    /// Stable id.
    pub id: Uuid,
    /// Thread awaiting a human reply.
    pub thread_id: Uuid,
    /// Lead email.
    pub lead_email: String,
    /// Why automation stopped (`ai_generation_failed`, `validation_failed`).
    pub reason: String,
    /// Excerpt of the inbound message.
    pub inbound_excerpt: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Durable "pending manual reply" records.
#[async_trait]
pub trait ManualReviewStore: Send + Sync {
    /// Persist a pending item.
    async fn push(&self, item: &ManualReviewItem) -> CoreResult<()>;

    /// List pending items, newest first.
    async fn list(&self, limit: usize) -> CoreResult<Vec<ManualReviewItem>>;
}

/// Which backend a [`Stores`] bundle runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// Postgres-backed, production safe.
    Postgres,
    /// In-memory fallback; development only.
    Memory,
}

/// The full set of domain stores handed to workers and services.
#[derive(Clone)]
pub struct Stores {
    /// Backend kind, reported by health checks.
    pub kind: StoreKind,
    /// Contacts.
    pub contacts: Arc<dyn ContactStore>,
    /// Companies.
    pub companies: Arc<dyn CompanyStore>,
    /// Campaign templates and instances.
    pub campaigns: Arc<dyn CampaignStore>,
    /// Enrolments.
    pub enrolments: Arc<dyn EnrolmentStore>,
    /// Outreach outcomes.
    pub outcomes: Arc<dyn OutcomeStore>,
    /// Idempotency records.
    pub idempotency: Arc<dyn IdempotencyStore>,
    /// Conversation threads.
    pub threads: Arc<dyn ThreadStore>,
    /// Enrichment cache.
    pub enrichment_cache: Arc<dyn EnrichmentCache>,
    /// CRM sync ledger.
    pub sync_ledger: Arc<dyn SyncLedger>,
    /// Pending manual replies.
    pub manual_review: Arc<dyn ManualReviewStore>,
}
