//! Postmark adapter, the secondary email channel.
//!
//! Postmark authenticates with the `X-Postmark-Server-Token` header. Its
//! webhooks are unsigned; they rely on transport auth at the edge.

use crate::error::{CoreError, CoreResult};
use crate::model::{EventType, NormalizedEvent};
use crate::providers::webhook::stable_event_id;
use crate::providers::{validate_batch, EmailMessage, EmailProvider, SendReceipt};
use crate::reliability::Remote;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::instrument;

const DEFAULT_BASE_URL: &str = "https://api.postmarkapp.com";

/// Postmark email adapter.
pub struct PostmarkEmail {
    http: reqwest::Client,
    base_url: String,
    server_token: String,
    sender: String,
    remote: Remote,
}

impl PostmarkEmail {
    /// Build the adapter.
    #[must_use]
    pub fn new(server_token: &str, sender: &str, remote: Remote) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            server_token: server_token.to_string(),
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
            .header("X-Postmark-Server-Token", &self.server_token)
            .header("Accept", "application/json")
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

    fn message_payload(&self, message: &EmailMessage) -> serde_json::Value {
        json!({
            "From": message.from.as_deref().unwrap_or(&self.sender),
            "To": message.to,
            "Subject": message.subject,
            "HtmlBody": message.body_html,
            "TextBody": message.body_text,
            "MessageStream": "outbound",
        })
    }

    fn receipt_from(&self, payload: &serde_json::Value) -> CoreResult<SendReceipt> {
        let error_code = payload
            .get("ErrorCode")
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(0);
        if error_code != 0 {
            let detail = payload
                .get("Message")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("postmark rejected the message");
            return Err(CoreError::PermanentRemote {
                status: 422,
                detail: format!("postmark error {error_code}: {detail}"),
            });
        }
        let id = payload
            .get("MessageID")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| CoreError::TransientRemote {
                status: None,
                detail: "postmark response missing MessageID".to_string(),
            })?;
        Ok(SendReceipt {
            provider_message_id: id.to_string(),
            provider: self.name().to_string(),
        })
    }
}

#[async_trait]
impl EmailProvider for PostmarkEmail {
    fn name(&self) -> &'static str {
        "postmark"
    }

    #[instrument(skip_all, fields(to = %message.to))]
    async fn send(&self, message: &EmailMessage) -> CoreResult<SendReceipt> {
        let body = self.message_payload(message);
        let payload = self
            .remote
            .call("send", || self.post_json("/email", &body))
            .await?;
        self.receipt_from(&payload)
    }

    async fn send_batch(&self, messages: &[EmailMessage]) -> CoreResult<Vec<SendReceipt>> {
        validate_batch(messages)?;
        let body = serde_json::Value::Array(
            messages.iter().map(|m| self.message_payload(m)).collect(),
        );
        let payload = self
            .remote
            .call("send_batch", || self.post_json("/email/batch", &body))
            .await?;
        let results = payload
            .as_array()
            .ok_or_else(|| CoreError::TransientRemote {
                status: None,
                detail: "postmark batch response was not an array".to_string(),
            })?;
        results.iter().map(|r| self.receipt_from(r)).collect()
    }

    async fn send_template(
        &self,
        template_id: &str,
        model: &serde_json::Value,
        to: &str,
    ) -> CoreResult<SendReceipt> {
        let body = json!({
            "TemplateAlias": template_id,
            "TemplateModel": model,
            "To": to,
            "From": self.sender,
            "MessageStream": "outbound",
        });
        let payload = self
            .remote
            .call("send_template", || {
                self.post_json("/email/withTemplate", &body)
            })
            .await?;
        self.receipt_from(&payload)
    }
}

fn parse_timestamp(payload: &serde_json::Value, keys: &[&str]) -> DateTime<Utc> {
    keys.iter()
        .find_map(|key| payload.get(*key).and_then(serde_json::Value::as_str))
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map_or_else(Utc::now, |dt| dt.with_timezone(&Utc))
}

/// Parse a Postmark webhook body into a normalised event.
///
/// Handles both lifecycle events (`RecordType`) and inbound replies (bodies
/// carrying `TextBody` without a `RecordType`).
///
/// # Errors
///
/// Returns a validation error for unparseable payloads or unknown types.
pub fn parse_webhook(raw: &[u8]) -> CoreResult<NormalizedEvent> {
    let payload: serde_json::Value = serde_json::from_slice(raw)
        .map_err(|e| CoreError::validation(format!("malformed postmark webhook: {e}")))?;

    let record_type = payload.get("RecordType").and_then(serde_json::Value::as_str);
    let event_type = match record_type {
        Some("Delivery") => EventType::Delivered,
        Some("Open") => EventType::Opened,
        Some("Click") => EventType::Clicked,
        Some("Bounce") => EventType::Bounced,
        Some("SpamComplaint") => EventType::Complained,
        Some("SubscriptionChange") => EventType::Unsubscribed,
        Some("Inbound") | None if payload.get("TextBody").is_some() => EventType::Replied,
        Some(other) => {
            return Err(CoreError::validation(format!(
                "unsupported postmark record type {other:?}"
            )))
        }
        None => return Err(CoreError::validation("postmark webhook missing RecordType")),
    };

    let email = payload
        .get("Recipient")
        .or_else(|| payload.get("Email"))
        .and_then(serde_json::Value::as_str)
        .map(ToString::to_string)
        .or_else(|| {
            payload
                .get("FromFull")
                .and_then(|f| f.get("Email"))
                .and_then(serde_json::Value::as_str)
                .map(ToString::to_string)
        })
        .ok_or_else(|| CoreError::validation("postmark webhook missing recipient"))?;

    let occurred_at = parse_timestamp(
        &payload,
        &["ReceivedAt", "DeliveredAt", "BouncedAt", "ChangedAt", "Date"],
    );

    let mut event = NormalizedEvent::new(event_type, "postmark", &email, occurred_at);
    event.id = stable_event_id(
        "postmark",
        payload.get("MessageID").and_then(serde_json::Value::as_str),
    );
    if let Some(message_id) = payload.get("MessageID").and_then(serde_json::Value::as_str) {
        event = event.with_message_id(message_id);
    }
    if let Some(campaign) = payload
        .get("Metadata")
        .and_then(|m| m.get("campaign_id"))
        .and_then(serde_json::Value::as_str)
        .and_then(|s| uuid::Uuid::parse_str(s).ok())
    {
        event = event.with_campaign(campaign);
    }
    if event_type == EventType::Replied {
        let body = payload
            .get("TextBody")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        let subject = payload.get("Subject").and_then(serde_json::Value::as_str);
        event = event.with_reply(subject, body);
    }
    Ok(event.with_raw(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bounce_event() {
        let raw = serde_json::to_vec(&json!({
            "RecordType": "Bounce",
            "MessageID": "pm-42",
            "Email": "bob@ex.com",
            "BouncedAt": "2026-03-01T10:00:00Z",
        }))
        .expect("json");
        let event = parse_webhook(&raw).expect("parse");
        assert_eq!(event.event_type, EventType::Bounced);
        assert_eq!(event.provider_message_id.as_deref(), Some("pm-42"));
    }

    #[test]
    fn parses_inbound_reply() {
        let raw = serde_json::to_vec(&json!({
            "FromFull": {"Email": "alice@ex.com"},
            "Subject": "Re: quick question",
            "TextBody": "Please remove me from this list.",
            "MessageID": "pm-77",
            "Date": "2026-03-01T10:05:00Z",
        }))
        .expect("json");
        let event = parse_webhook(&raw).expect("parse");
        assert_eq!(event.event_type, EventType::Replied);
        assert_eq!(event.email, "alice@ex.com");
        let reply = event.reply.expect("reply");
        assert_eq!(reply.body, "Please remove me from this list.");
        assert_eq!(reply.subject.as_deref(), Some("Re: quick question"));
    }

    #[test]
    fn campaign_metadata_round_trips() {
        let campaign = uuid::Uuid::new_v4();
        let raw = serde_json::to_vec(&json!({
            "RecordType": "Open",
            "MessageID": "pm-1",
            "Recipient": "bob@ex.com",
            "Metadata": {"campaign_id": campaign.to_string()},
        }))
        .expect("json");
        let event = parse_webhook(&raw).expect("parse");
        assert_eq!(event.campaign_id, Some(campaign));
    }
}
