//! Lemlist adapter, the primary email channel.
//!
//! Lemlist authenticates with HTTP basic auth (empty user, API key as
//! password) and signs its webhooks.

use crate::error::{CoreError, CoreResult};
use crate::model::{EventType, NormalizedEvent};
use crate::providers::webhook::stable_event_id;
use crate::providers::{
    validate_batch, EmailMessage, EmailProvider, SendReceipt, MAX_BATCH_MESSAGES,
};
use crate::reliability::Remote;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::instrument;

/// Header carrying the webhook HMAC signature.
pub const SIGNATURE_HEADER: &str = "x-lemlist-signature";

const DEFAULT_BASE_URL: &str = "https://api.lemlist.com/api";

/// Lemlist email adapter.
pub struct LemlistEmail {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    sender: String,
    remote: Remote,
}

impl LemlistEmail {
    /// Build the adapter.
    #[must_use]
    pub fn new(api_key: &str, sender: &str, remote: Remote) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.to_string(),
            sender: sender.to_string(),
            remote,
        }
    }

    /// Override the API base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Breaker state, surfaced through health checks.
    #[must_use]
    pub fn breaker_state(&self) -> crate::reliability::BreakerState {
        self.remote.breaker_state()
    }

    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> CoreResult<serde_json::Value> {
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .basic_auth("", Some(&self.api_key))
            .json(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CoreError::from_status(status.as_u16(), detail));
        }
        Ok(response.json().await?)
    }

    fn receipt_from(&self, payload: &serde_json::Value) -> CoreResult<SendReceipt> {
        let id = payload
            .get("_id")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| CoreError::TransientRemote {
                status: None,
                detail: "lemlist response missing _id".to_string(),
            })?;
        Ok(SendReceipt {
            provider_message_id: id.to_string(),
            provider: self.name().to_string(),
        })
    }
}

#[async_trait]
impl EmailProvider for LemlistEmail {
    fn name(&self) -> &'static str {
        "lemlist"
    }

    #[instrument(skip_all, fields(to = %message.to))]
    async fn send(&self, message: &EmailMessage) -> CoreResult<SendReceipt> {
        let body = json!({
            "from": message.from.as_deref().unwrap_or(&self.sender),
            "to": message.to,
            "subject": message.subject,
            "html": message.body_html,
            "text": message.body_text,
        });
        let payload = self
            .remote
            .call("send", || self.post_json("/emails", &body))
            .await?;
        self.receipt_from(&payload)
    }

    async fn send_batch(&self, messages: &[EmailMessage]) -> CoreResult<Vec<SendReceipt>> {
        validate_batch(messages)?;
        // Lemlist has no batch endpoint; chunks stay well under the
        // MAX_BATCH_MESSAGES contract by construction.
        let mut receipts = Vec::with_capacity(messages.len().min(MAX_BATCH_MESSAGES));
        for message in messages {
            receipts.push(self.send(message).await?);
        }
        Ok(receipts)
    }

    async fn send_template(
        &self,
        template_id: &str,
        model: &serde_json::Value,
        to: &str,
    ) -> CoreResult<SendReceipt> {
        let body = json!({
            "templateId": template_id,
            "variables": model,
            "to": to,
            "from": self.sender,
        });
        let payload = self
            .remote
            .call("send_template", || {
                self.post_json("/emails/template", &body)
            })
            .await?;
        self.receipt_from(&payload)
    }
}

/// Parse a Lemlist webhook body into a normalised event.
///
/// # Errors
///
/// Returns a validation error for unparseable payloads or unknown types.
pub fn parse_webhook(raw: &[u8]) -> CoreResult<NormalizedEvent> {
    let payload: serde_json::Value = serde_json::from_slice(raw)
        .map_err(|e| CoreError::validation(format!("malformed lemlist webhook: {e}")))?;

    let kind = payload
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| CoreError::validation("lemlist webhook missing type"))?;
    let event_type = match kind {
        "emailsSent" | "emailsDelivered" => EventType::Delivered,
        "emailsOpened" => EventType::Opened,
        "emailsClicked" => EventType::Clicked,
        "emailsBounced" => EventType::Bounced,
        "emailsReplied" => EventType::Replied,
        "emailsComplained" => EventType::Complained,
        "emailsUnsubscribed" => EventType::Unsubscribed,
        other => {
            return Err(CoreError::validation(format!(
                "unsupported lemlist event type {other:?}"
            )))
        }
    };

    let email = payload
        .get("leadEmail")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| CoreError::validation("lemlist webhook missing leadEmail"))?;
    let occurred_at = payload
        .get("createdAt")
        .and_then(serde_json::Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map_or_else(Utc::now, |dt| dt.with_timezone(&Utc));

    let mut event = NormalizedEvent::new(event_type, "lemlist", email, occurred_at);
    event.id = stable_event_id(
        "lemlist",
        payload.get("_id").and_then(serde_json::Value::as_str),
    );
    if let Some(message_id) = payload.get("messageId").and_then(serde_json::Value::as_str) {
        event = event.with_message_id(message_id);
    }
    if let Some(campaign) = payload
        .get("campaignId")
        .and_then(serde_json::Value::as_str)
        .and_then(|s| uuid::Uuid::parse_str(s).ok())
    {
        event = event.with_campaign(campaign);
    }
    if event_type == EventType::Replied {
        let body = payload
            .get("text")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        event = event.with_reply(None, body);
    }
    Ok(event.with_raw(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_open_event() {
        let campaign = uuid::Uuid::new_v4();
        let raw = serde_json::to_vec(&json!({
            "_id": "evt-1",
            "type": "emailsOpened",
            "leadEmail": "Bob@Ex.com",
            "messageId": "PM-7",
            "campaignId": campaign.to_string(),
            "createdAt": "2026-03-01T09:30:00Z",
        }))
        .expect("json");

        let event = parse_webhook(&raw).expect("parse");
        assert_eq!(event.event_type, EventType::Opened);
        assert_eq!(event.email, "bob@ex.com");
        assert_eq!(event.provider_message_id.as_deref(), Some("PM-7"));
        assert_eq!(event.campaign_id, Some(campaign));
        assert_eq!(event.provider, "lemlist");
    }

    #[test]
    fn replays_share_the_stable_id() {
        let raw = serde_json::to_vec(&json!({
            "_id": "evt-9",
            "type": "emailsReplied",
            "leadEmail": "a@b.c",
            "text": "tell me more",
        }))
        .expect("json");
        let first = parse_webhook(&raw).expect("parse");
        let second = parse_webhook(&raw).expect("parse");
        assert_eq!(first.id, second.id);
        assert_eq!(first.reply.expect("reply").body, "tell me more");
    }

    #[test]
    fn unknown_type_is_rejected() {
        let raw = serde_json::to_vec(&json!({
            "type": "somethingElse",
            "leadEmail": "a@b.c",
        }))
        .expect("json");
        assert!(parse_webhook(&raw).is_err());
    }
}
