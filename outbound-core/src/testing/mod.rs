//! Test doubles for the provider surface and the generator.
//!
//! Used by the crate's own tests and by downstream integration tests; the
//! doubles record what they were asked to do and answer deterministically.

use crate::error::{CoreError, CoreResult};
use crate::providers::{
    EmailMessage, EmailProvider, EnrichmentProvider, LinkedInProvider, LinkedInRequest,
    SendReceipt, VideoProvider,
};
use crate::responder::{KnowledgeBundle, KnowledgeService, ReplyGenerator};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// Email provider that records every send and always succeeds.
#[derive(Default)]
pub struct RecordingEmail {
    sent: Mutex<Vec<EmailMessage>>,
    counter: AtomicUsize,
}

impl RecordingEmail {
    /// Number of messages sent so far.
    #[must_use]
    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// Snapshot of the sent messages.
    #[must_use]
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().clone()
    }

    fn receipt(&self) -> SendReceipt {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        SendReceipt {
            provider_message_id: format!("rec-{n}"),
            provider: "recording".to_string(),
        }
    }
}

#[async_trait]
impl EmailProvider for RecordingEmail {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, message: &EmailMessage) -> CoreResult<SendReceipt> {
        self.sent.lock().push(message.clone());
        Ok(self.receipt())
    }

    async fn send_batch(&self, messages: &[EmailMessage]) -> CoreResult<Vec<SendReceipt>> {
        let mut receipts = Vec::with_capacity(messages.len());
        for message in messages {
            self.sent.lock().push(message.clone());
            receipts.push(self.receipt());
        }
        Ok(receipts)
    }

    async fn send_template(
        &self,
        _template_id: &str,
        _model: &serde_json::Value,
        to: &str,
    ) -> CoreResult<SendReceipt> {
        self.sent.lock().push(EmailMessage {
            to: to.to_string(),
            from: None,
            subject: String::new(),
            body_html: None,
            body_text: None,
            idempotency_key: None,
        });
        Ok(self.receipt())
    }
}

/// Email provider that always fails with a configured error.
pub struct FailingEmail {
    error: CoreError,
}

impl FailingEmail {
    /// Fail every call with `error`.
    #[must_use]
    pub const fn new(error: CoreError) -> Self {
        Self { error }
    }
}

#[async_trait]
impl EmailProvider for FailingEmail {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn send(&self, _message: &EmailMessage) -> CoreResult<SendReceipt> {
        Err(self.error.clone())
    }

    async fn send_batch(&self, _messages: &[EmailMessage]) -> CoreResult<Vec<SendReceipt>> {
        Err(self.error.clone())
    }

    async fn send_template(
        &self,
        _template_id: &str,
        _model: &serde_json::Value,
        _to: &str,
    ) -> CoreResult<SendReceipt> {
        Err(self.error.clone())
    }
}

/// LinkedIn provider that records every request.
#[derive(Default)]
pub struct RecordingLinkedIn {
    requests: Mutex<Vec<LinkedInRequest>>,
}

impl RecordingLinkedIn {
    /// Number of requests sent.
    #[must_use]
    pub fn sent_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl LinkedInProvider for RecordingLinkedIn {
    fn name(&self) -> &'static str {
        "recording-linkedin"
    }

    async fn send_connection_request(&self, request: &LinkedInRequest) -> CoreResult<SendReceipt> {
        self.requests.lock().push(request.clone());
        Ok(SendReceipt {
            provider_message_id: format!("li-{}", Uuid::new_v4()),
            provider: "recording-linkedin".to_string(),
        })
    }

    async fn send_message(&self, request: &LinkedInRequest) -> CoreResult<SendReceipt> {
        self.requests.lock().push(request.clone());
        Ok(SendReceipt {
            provider_message_id: format!("li-{}", Uuid::new_v4()),
            provider: "recording-linkedin".to_string(),
        })
    }
}

/// Enrichment provider answering from fixed payloads.
pub struct StubEnrichment {
    contact_payload: serde_json::Value,
    company_payload: serde_json::Value,
    calls: AtomicUsize,
}

impl StubEnrichment {
    /// Build with fixed contact and company payloads.
    #[must_use]
    pub fn new(
        contact_payload: serde_json::Value,
        company_payload: serde_json::Value,
    ) -> Self {
        Self {
            contact_payload,
            company_payload,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of enrichment calls made.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EnrichmentProvider for StubEnrichment {
    fn name(&self) -> &'static str {
        "stub-enrichment"
    }

    async fn enrich_contact(&self, _email: &str) -> CoreResult<serde_json::Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.contact_payload.clone())
    }

    async fn enrich_company(&self, _domain: &str) -> CoreResult<serde_json::Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.company_payload.clone())
    }

    async fn discover_contacts(
        &self,
        _domain: &str,
        _titles: &[String],
    ) -> CoreResult<Vec<serde_json::Value>> {
        Ok(Vec::new())
    }
}

/// Video provider that records scripts.
#[derive(Default)]
pub struct RecordingVideo {
    scripts: Mutex<Vec<String>>,
}

impl RecordingVideo {
    /// Number of videos generated.
    #[must_use]
    pub fn generated_count(&self) -> usize {
        self.scripts.lock().len()
    }
}

#[async_trait]
impl VideoProvider for RecordingVideo {
    fn name(&self) -> &'static str {
        "recording-video"
    }

    async fn generate_video(&self, script: &str, _persona: &str) -> CoreResult<String> {
        self.scripts.lock().push(script.to_string());
        Ok(format!("video-{}", Uuid::new_v4()))
    }
}

/// Generator that answers with a fixed reply.
pub struct StubGenerator {
    reply: String,
}

impl StubGenerator {
    /// Always generate `reply`.
    #[must_use]
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
        }
    }
}

#[async_trait]
impl ReplyGenerator for StubGenerator {
    async fn generate(&self, _system_prompt: &str, _user_prompt: &str) -> CoreResult<String> {
        Ok(self.reply.clone())
    }
}

/// Generator that fails every call.
pub struct FailingGenerator;

#[async_trait]
impl ReplyGenerator for FailingGenerator {
    async fn generate(&self, _system_prompt: &str, _user_prompt: &str) -> CoreResult<String> {
        Err(CoreError::TransientRemote {
            status: Some(500),
            detail: "generator unavailable".to_string(),
        })
    }
}

/// Generator that never answers within any sane deadline.
pub struct SlowGenerator {
    delay: Duration,
}

impl SlowGenerator {
    /// Take `delay` before answering.
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl ReplyGenerator for SlowGenerator {
    async fn generate(&self, _system_prompt: &str, _user_prompt: &str) -> CoreResult<String> {
        tokio::time::sleep(self.delay).await;
        Ok("too late".to_string())
    }
}

/// Knowledge service answering with the default bundle.
#[derive(Debug, Clone, Default)]
pub struct StubKnowledge;

#[async_trait]
impl KnowledgeService for StubKnowledge {
    async fn bundle(&self, _campaign_id: Uuid, _lead_email: &str) -> CoreResult<KnowledgeBundle> {
        Ok(KnowledgeBundle::default())
    }
}
