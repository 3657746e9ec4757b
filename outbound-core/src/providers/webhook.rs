//! Webhook verification and normalisation plumbing.
//!
//! Each provider gets a [`WebhookHandler`] that verifies the raw body before
//! anything is parsed or enqueued. Providers that sign use HMAC-SHA256 over
//! the raw body with a constant-time comparison; providers that do not sign
//! rely on transport auth at the edge.

use crate::error::{CoreError, CoreResult};
use crate::model::NormalizedEvent;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use subtle::ConstantTimeEq;
use tracing::debug;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Derive a stable event id from the provider's own event id.
///
/// Replays of the same upstream event map to the same id, which is what
/// keeps DLQ replay idempotent downstream. Events without a provider id get
/// a fresh random id.
#[must_use]
pub fn stable_event_id(provider: &str, provider_event_id: Option<&str>) -> Uuid {
    provider_event_id.map_or_else(Uuid::new_v4, |id| {
        let mut hasher = Sha256::new();
        hasher.update(provider.as_bytes());
        hasher.update(b":");
        hasher.update(id.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0_u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Uuid::from_bytes(bytes)
    })
}

/// Compute the hex HMAC-SHA256 signature of a body.
///
/// HMAC-SHA256 accepts any key length; the fallback arm fails closed by
/// producing a signature nothing can match.
#[must_use]
pub fn sign_body(secret: &str, raw_body: &[u8]) -> String {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(raw_body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time comparison of a presented signature against the expected
/// one.
#[must_use]
pub fn verify_signature(secret: &str, raw_body: &[u8], presented: &str) -> bool {
    let expected = sign_body(secret, raw_body);
    let presented = presented.trim().trim_start_matches("sha256=");
    if expected.is_empty() || presented.len() != expected.len() {
        return false;
    }
    expected.as_bytes().ct_eq(presented.as_bytes()).into()
}

type ParseFn = fn(&[u8]) -> CoreResult<NormalizedEvent>;

/// Verification + parsing surface for one provider's webhooks.
#[derive(Clone)]
pub struct WebhookHandler {
    provider: String,
    secret: Option<String>,
    signature_header: Option<String>,
    parse: ParseFn,
}

impl WebhookHandler {
    /// Handler for a provider that signs its webhooks.
    #[must_use]
    pub fn signed(provider: &str, secret: &str, signature_header: &str, parse: ParseFn) -> Self {
        Self {
            provider: provider.to_string(),
            secret: Some(secret.to_string()),
            signature_header: Some(signature_header.to_lowercase()),
            parse,
        }
    }

    /// Handler for a provider relying on transport auth.
    #[must_use]
    pub fn transport_auth(provider: &str, parse: ParseFn) -> Self {
        Self {
            provider: provider.to_string(),
            secret: None,
            signature_header: None,
            parse,
        }
    }

    /// Provider name.
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Verify the raw body against the provider's signature header.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a missing or invalid signature; the
    /// edge maps this to 401 and the event is never enqueued.
    pub fn verify(&self, raw_body: &[u8], headers: &HashMap<String, String>) -> CoreResult<()> {
        let (Some(secret), Some(header)) = (&self.secret, &self.signature_header) else {
            debug!(provider = %self.provider, "webhook relies on transport auth");
            return Ok(());
        };
        let presented = headers
            .get(header)
            .ok_or_else(|| CoreError::validation(format!("missing {header} header")))?;
        if verify_signature(secret, raw_body, presented) {
            Ok(())
        } else {
            Err(CoreError::validation("invalid webhook signature"))
        }
    }

    /// Parse the raw body into a normalised event.
    ///
    /// # Errors
    ///
    /// Returns a validation error for unparseable payloads.
    pub fn parse(&self, raw_body: &[u8]) -> CoreResult<NormalizedEvent> {
        (self.parse)(raw_body)
    }
}

/// Routes `/webhooks/{provider}` to the right handler.
#[derive(Clone, Default)]
pub struct WebhookRegistry {
    handlers: HashMap<String, WebhookHandler>,
}

impl WebhookRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its provider name.
    pub fn register(&mut self, handler: WebhookHandler) {
        self.handlers
            .insert(handler.provider().to_string(), handler);
    }

    /// Look up the handler for a provider.
    #[must_use]
    pub fn get(&self, provider: &str) -> Option<&WebhookHandler> {
        self.handlers.get(provider)
    }

    /// Registered provider names.
    #[must_use]
    pub fn providers(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EventType;
    use chrono::Utc;

    fn parse_stub(_raw: &[u8]) -> CoreResult<NormalizedEvent> {
        Ok(NormalizedEvent::new(
            EventType::Opened,
            "stub",
            "a@b.c",
            Utc::now(),
        ))
    }

    #[test]
    fn stable_ids_are_stable() {
        let a = stable_event_id("postmark", Some("evt-1"));
        let b = stable_event_id("postmark", Some("evt-1"));
        assert_eq!(a, b);
        assert_ne!(a, stable_event_id("postmark", Some("evt-2")));
        assert_ne!(a, stable_event_id("lemlist", Some("evt-1")));
    }

    #[test]
    fn valid_signature_verifies() {
        let body = br#"{"type":"emailsOpened"}"#;
        let signature = sign_body("topsecret", body);
        assert!(verify_signature("topsecret", body, &signature));
        assert!(verify_signature(
            "topsecret",
            body,
            &format!("sha256={signature}")
        ));
    }

    #[test]
    fn tampered_body_fails_verification() {
        let signature = sign_body("topsecret", b"payload");
        assert!(!verify_signature("topsecret", b"tampered", &signature));
        assert!(!verify_signature("wrong-secret", b"payload", &signature));
    }

    #[test]
    fn signed_handler_rejects_missing_header() {
        let handler = WebhookHandler::signed("lemlist", "s", "x-lemlist-signature", parse_stub);
        let err = handler.verify(b"{}", &HashMap::new()).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn signed_handler_accepts_good_signature() {
        let handler = WebhookHandler::signed("lemlist", "s", "x-lemlist-signature", parse_stub);
        let body = b"{}";
        let mut headers = HashMap::new();
        headers.insert("x-lemlist-signature".to_string(), sign_body("s", body));
        handler.verify(body, &headers).expect("verified");
    }

    #[test]
    fn transport_auth_handler_accepts_anything() {
        let handler = WebhookHandler::transport_auth("postmark", parse_stub);
        handler.verify(b"{}", &HashMap::new()).expect("accepted");
    }
}
