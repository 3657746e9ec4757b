//! Pluggable outreach-provider abstraction.
//!
//! Third-party services hide behind capability traits; the factory selects
//! and wraps adapters per configuration. Adapters never call the network
//! directly; every request goes through [`crate::reliability::Remote`].

mod crm;
mod email;
mod enrichment;
mod factory;
mod idempotent;
mod linkedin;
mod video;
pub mod webhook;

pub use crm::{HubSpotCrm, MAX_CRM_BATCH};
pub use email::{ConsoleEmail, LemlistEmail, PostmarkEmail};
pub use enrichment::ExploriumEnrichment;
pub use factory::ProviderSet;
pub use idempotent::{FallbackEmail, IdempotentEmail, IdempotentLinkedIn};
pub use linkedin::{LemlistLinkedIn, PhantomBusterLinkedIn};
pub use video::HeyGenVideo;
pub use webhook::{stable_event_id, WebhookHandler, WebhookRegistry};

use crate::error::{CoreError, CoreResult};
use crate::model::Contact;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Maximum messages per batch send.
pub const MAX_BATCH_MESSAGES: usize = 500;

/// Maximum total payload bytes per batch send (50 MB).
pub const MAX_BATCH_BYTES: usize = 50 * 1024 * 1024;

/// An outbound email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMessage {
    /// Recipient address.
    pub to: String,

    /// Sender address; adapters fall back to their configured sender.
    pub from: Option<String>,

    /// Subject line.
    pub subject: String,

    /// HTML body.
    pub body_html: Option<String>,

    /// Plain-text body.
    pub body_text: Option<String>,

    /// Idempotency key derived from `(campaign, enrolment, stage)`; sends
    /// carrying a key are replay-safe.
    pub idempotency_key: Option<String>,
}

impl EmailMessage {
    /// Approximate wire size, used for batch limits.
    #[must_use]
    pub fn approximate_size(&self) -> usize {
        self.to.len()
            + self.subject.len()
            + self.body_html.as_ref().map_or(0, String::len)
            + self.body_text.as_ref().map_or(0, String::len)
    }
}

/// An outbound LinkedIn action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkedInRequest {
    /// Target profile URL.
    pub profile_url: String,

    /// Message or connection note.
    pub message: String,

    /// Idempotency key; same contract as [`EmailMessage`].
    pub idempotency_key: Option<String>,
}

/// Result of a send, recorded in the idempotency store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendReceipt {
    /// Provider-side message id.
    pub provider_message_id: String,

    /// Which provider performed the send.
    pub provider: String,
}

/// Email sending capability.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Adapter name for logging and webhook routing.
    fn name(&self) -> &'static str;

    /// Send one message.
    async fn send(&self, message: &EmailMessage) -> CoreResult<SendReceipt>;

    /// Send a batch (≤ [`MAX_BATCH_MESSAGES`] messages, ≤
    /// [`MAX_BATCH_BYTES`] total).
    async fn send_batch(&self, messages: &[EmailMessage]) -> CoreResult<Vec<SendReceipt>>;

    /// Send a provider-side template with a substitution model.
    async fn send_template(
        &self,
        template_id: &str,
        model: &serde_json::Value,
        to: &str,
    ) -> CoreResult<SendReceipt>;
}

/// LinkedIn outreach capability. Per-account daily ceilings are enforced by
/// the provider; the local token bucket only smooths request rate.
#[async_trait]
pub trait LinkedInProvider: Send + Sync {
    /// Adapter name.
    fn name(&self) -> &'static str;

    /// Send a connection request with a note.
    async fn send_connection_request(&self, request: &LinkedInRequest) -> CoreResult<SendReceipt>;

    /// Message an existing connection.
    async fn send_message(&self, request: &LinkedInRequest) -> CoreResult<SendReceipt>;
}

/// CRM synchronisation capability.
#[async_trait]
pub trait CrmProvider: Send + Sync {
    /// Adapter name.
    fn name(&self) -> &'static str;

    /// Upsert one contact; returns the CRM-side id.
    async fn upsert_contact(&self, contact: &Contact) -> CoreResult<String>;

    /// Upsert up to 100 contacts in one call; per-item results so the
    /// caller can continue on partial failure.
    async fn upsert_batch(&self, contacts: &[Contact]) -> CoreResult<Vec<CoreResult<String>>>;

    /// Log an activity note against a CRM record.
    async fn log_activity(&self, external_id: &str, note: &str) -> CoreResult<()>;

    /// Search CRM records.
    async fn search(&self, query: &str) -> CoreResult<Vec<serde_json::Value>>;
}

/// Data enrichment capability.
#[async_trait]
pub trait EnrichmentProvider: Send + Sync {
    /// Adapter name.
    fn name(&self) -> &'static str;

    /// Enrich a contact by email.
    async fn enrich_contact(&self, email: &str) -> CoreResult<serde_json::Value>;

    /// Enrich a company by domain.
    async fn enrich_company(&self, domain: &str) -> CoreResult<serde_json::Value>;

    /// Discover contacts at a company matching the given titles.
    async fn discover_contacts(
        &self,
        domain: &str,
        titles: &[String],
    ) -> CoreResult<Vec<serde_json::Value>>;
}

/// Personalised-video generation capability.
#[async_trait]
pub trait VideoProvider: Send + Sync {
    /// Adapter name.
    fn name(&self) -> &'static str;

    /// Generate a video from a script; returns the provider-side video id.
    async fn generate_video(&self, script: &str, persona: &str) -> CoreResult<String>;
}

/// Derive the deterministic idempotency key for a send.
#[must_use]
pub fn derive_send_key(campaign_id: Uuid, enrolment_id: Uuid, stage: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(campaign_id.as_bytes());
    hasher.update(enrolment_id.as_bytes());
    hasher.update(stage.to_be_bytes());
    hex::encode(hasher.finalize())
}

/// Validate batch limits before any network traffic.
///
/// # Errors
///
/// Returns a validation error when either limit is exceeded.
pub fn validate_batch(messages: &[EmailMessage]) -> CoreResult<()> {
    if messages.len() > MAX_BATCH_MESSAGES {
        return Err(CoreError::validation(format!(
            "batch of {} exceeds the {MAX_BATCH_MESSAGES}-message limit",
            messages.len()
        )));
    }
    let total: usize = messages.iter().map(EmailMessage::approximate_size).sum();
    if total > MAX_BATCH_BYTES {
        return Err(CoreError::validation(format!(
            "batch payload of {total} bytes exceeds the {MAX_BATCH_BYTES}-byte limit"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(to: &str) -> EmailMessage {
        EmailMessage {
            to: to.to_string(),
            from: None,
            subject: "hello".to_string(),
            body_html: None,
            body_text: Some("hi".to_string()),
            idempotency_key: None,
        }
    }

    #[test]
    fn send_key_is_deterministic() {
        let campaign = Uuid::new_v4();
        let enrolment = Uuid::new_v4();
        let a = derive_send_key(campaign, enrolment, 0);
        let b = derive_send_key(campaign, enrolment, 0);
        assert_eq!(a, b);
        assert_ne!(a, derive_send_key(campaign, enrolment, 1));
    }

    #[test]
    fn batch_message_limit_is_enforced() {
        let messages: Vec<_> = (0..=MAX_BATCH_MESSAGES).map(|_| message("a@b.c")).collect();
        assert!(validate_batch(&messages).is_err());
        assert!(validate_batch(&messages[..MAX_BATCH_MESSAGES]).is_ok());
    }

    #[test]
    fn batch_byte_limit_is_enforced() {
        let mut big = message("a@b.c");
        big.body_text = Some("x".repeat(MAX_BATCH_BYTES + 1));
        assert!(validate_batch(&[big]).is_err());
    }
}
