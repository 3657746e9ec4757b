//! Idempotency and fallback decorators around provider adapters.
//!
//! Layering, outermost first: idempotency → fallback → adapter. The
//! idempotency record is written under one key regardless of which adapter
//! ultimately performed the send, so a fallback send is still replay-safe.

use crate::error::{CoreError, CoreResult};
use crate::providers::{
    EmailMessage, EmailProvider, LinkedInProvider, LinkedInRequest, SendReceipt,
};
use crate::store::{IdempotencyStore, Reservation};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Reservations older than this with no recorded result are treated as
/// abandoned (the process died between reserve and fulfil) and taken over.
const STALE_RESERVATION_AFTER: Duration = Duration::from_secs(120);

fn receipt_from_record(result: &serde_json::Value) -> CoreResult<SendReceipt> {
    serde_json::from_value(result.clone())
        .map_err(|e| CoreError::Storage(format!("corrupt idempotency record: {e}")))
}

fn reservation_is_stale(record: &crate::store::IdempotencyRecord) -> bool {
    let age = Utc::now().signed_duration_since(record.created_at);
    age.num_seconds() >= 0
        && age.to_std().unwrap_or(Duration::ZERO) > STALE_RESERVATION_AFTER
}

async fn idempotent_send<F, Fut>(
    store: &Arc<dyn IdempotencyStore>,
    operation: &str,
    key: Option<&str>,
    send: F,
) -> CoreResult<SendReceipt>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = CoreResult<SendReceipt>>,
{
    let Some(key) = key else {
        // No key: the caller opted out of replay protection.
        return send().await;
    };

    match store.reserve(operation, key).await? {
        Reservation::Acquired => {}
        Reservation::Existing(record) if !record.result.is_null() => {
            info!(operation, key, "send short-circuited by idempotency record");
            return receipt_from_record(&record.result);
        }
        Reservation::Existing(record) if reservation_is_stale(&record) => {
            warn!(operation, key, "taking over stale send reservation");
        }
        Reservation::Existing(_) => {
            // Another worker is mid-send; surface a conflict rather than
            // double-sending.
            return Err(CoreError::Conflict { existing: None });
        }
    }

    let receipt = send().await?;
    let recorded = serde_json::to_value(&receipt)
        .map_err(|e| CoreError::Storage(format!("encode receipt: {e}")))?;
    store.fulfil(operation, key, recorded).await?;
    Ok(receipt)
}

/// Email decorator that consults the idempotency store before sending.
pub struct IdempotentEmail {
    inner: Arc<dyn EmailProvider>,
    store: Arc<dyn IdempotencyStore>,
}

impl IdempotentEmail {
    /// Operation name used in the idempotency store.
    pub const OPERATION: &'static str = "email_send";

    /// Wrap an email provider.
    #[must_use]
    pub fn new(inner: Arc<dyn EmailProvider>, store: Arc<dyn IdempotencyStore>) -> Self {
        Self { inner, store }
    }
}

#[async_trait]
impl EmailProvider for IdempotentEmail {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn send(&self, message: &EmailMessage) -> CoreResult<SendReceipt> {
        idempotent_send(
            &self.store,
            Self::OPERATION,
            message.idempotency_key.as_deref(),
            || self.inner.send(message),
        )
        .await
    }

    async fn send_batch(&self, messages: &[EmailMessage]) -> CoreResult<Vec<SendReceipt>> {
        // Batch sends are import-path traffic without per-message keys.
        self.inner.send_batch(messages).await
    }

    async fn send_template(
        &self,
        template_id: &str,
        model: &serde_json::Value,
        to: &str,
    ) -> CoreResult<SendReceipt> {
        self.inner.send_template(template_id, model, to).await
    }
}

/// LinkedIn decorator with the same idempotency contract.
pub struct IdempotentLinkedIn {
    inner: Arc<dyn LinkedInProvider>,
    store: Arc<dyn IdempotencyStore>,
}

impl IdempotentLinkedIn {
    /// Operation name used in the idempotency store.
    pub const OPERATION: &'static str = "linkedin_send";

    /// Wrap a LinkedIn provider.
    #[must_use]
    pub fn new(inner: Arc<dyn LinkedInProvider>, store: Arc<dyn IdempotencyStore>) -> Self {
        Self { inner, store }
    }
}

#[async_trait]
impl LinkedInProvider for IdempotentLinkedIn {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn send_connection_request(&self, request: &LinkedInRequest) -> CoreResult<SendReceipt> {
        idempotent_send(
            &self.store,
            Self::OPERATION,
            request.idempotency_key.as_deref(),
            || self.inner.send_connection_request(request),
        )
        .await
    }

    async fn send_message(&self, request: &LinkedInRequest) -> CoreResult<SendReceipt> {
        idempotent_send(
            &self.store,
            Self::OPERATION,
            request.idempotency_key.as_deref(),
            || self.inner.send_message(request),
        )
        .await
    }
}

/// Email decorator that falls back to a secondary adapter when the primary
/// fails after its own retries.
pub struct FallbackEmail {
    primary: Arc<dyn EmailProvider>,
    secondary: Arc<dyn EmailProvider>,
    fallback_on_failure: bool,
}

impl FallbackEmail {
    /// Wrap a primary/secondary pair.
    #[must_use]
    pub fn new(
        primary: Arc<dyn EmailProvider>,
        secondary: Arc<dyn EmailProvider>,
        fallback_on_failure: bool,
    ) -> Self {
        Self {
            primary,
            secondary,
            fallback_on_failure,
        }
    }

    fn should_fall_back(&self, err: &CoreError) -> bool {
        if !self.fallback_on_failure {
            return false;
        }
        // Caller mistakes stay with the caller; remote trouble is worth a
        // second opinion.
        !matches!(err, CoreError::Validation(_) | CoreError::Conflict { .. })
    }
}

#[async_trait]
impl EmailProvider for FallbackEmail {
    fn name(&self) -> &'static str {
        self.primary.name()
    }

    async fn send(&self, message: &EmailMessage) -> CoreResult<SendReceipt> {
        match self.primary.send(message).await {
            Ok(receipt) => Ok(receipt),
            Err(err) if self.should_fall_back(&err) => {
                warn!(
                    primary = self.primary.name(),
                    secondary = self.secondary.name(),
                    error = %err,
                    "primary email send failed, trying secondary once"
                );
                metrics::counter!("email_fallback_sends").increment(1);
                self.secondary.send(message).await
            }
            Err(err) => Err(err),
        }
    }

    async fn send_batch(&self, messages: &[EmailMessage]) -> CoreResult<Vec<SendReceipt>> {
        match self.primary.send_batch(messages).await {
            Ok(receipts) => Ok(receipts),
            Err(err) if self.should_fall_back(&err) => {
                warn!(error = %err, "primary batch send failed, trying secondary once");
                self.secondary.send_batch(messages).await
            }
            Err(err) => Err(err),
        }
    }

    async fn send_template(
        &self,
        template_id: &str,
        model: &serde_json::Value,
        to: &str,
    ) -> CoreResult<SendReceipt> {
        match self.primary.send_template(template_id, model, to).await {
            Ok(receipt) => Ok(receipt),
            Err(err) if self.should_fall_back(&err) => {
                warn!(error = %err, "primary template send failed, trying secondary once");
                self.secondary.send_template(template_id, model, to).await
            }
            Err(err) => Err(err),
        }
    }
}
