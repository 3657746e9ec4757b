//! Provider-agnostic webhook events.
//!
//! Every adapter normalises its webhook payloads into [`NormalizedEvent`];
//! downstream components only ever read normalised fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::normalise_email;

/// Lifecycle event type reported by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// Message accepted by the recipient's server.
    Delivered,
    /// Message opened.
    Opened,
    /// A link was clicked.
    Clicked,
    /// Hard or soft bounce.
    Bounced,
    /// The recipient replied.
    Replied,
    /// Spam complaint.
    Complained,
    /// The recipient unsubscribed.
    Unsubscribed,
}

impl EventType {
    /// Lowercase event name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Opened => "opened",
            Self::Clicked => "clicked",
            Self::Bounced => "bounced",
            Self::Replied => "replied",
            Self::Complained => "complained",
            Self::Unsubscribed => "unsubscribed",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Reply payload carried by `replied` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyContent {
    /// Reply subject, when the channel has one.
    pub subject: Option<String>,
    /// Reply body text.
    pub body: String,
}

/// A webhook event in provider-agnostic form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedEvent {
    /// Stable event id; replays of the same upstream event reuse it, which
    /// keeps DLQ replay idempotent downstream.
    pub id: Uuid,

    /// Event type.
    pub event_type: EventType,

    /// Provider that emitted the event.
    pub provider: String,

    /// Provider-side message id the event refers to.
    pub provider_message_id: Option<String>,

    /// Recipient email, normalised.
    pub email: String,

    /// Campaign the message belonged to, when the provider reports it.
    pub campaign_id: Option<Uuid>,

    /// When the event occurred at the provider.
    pub occurred_at: DateTime<Utc>,

    /// Reply payload for `replied` events.
    pub reply: Option<ReplyContent>,

    /// Raw provider payload, kept for audit and the DLQ.
    pub raw: serde_json::Value,
}

impl NormalizedEvent {
    /// Build an event with a fresh stable id.
    #[must_use]
    pub fn new(
        event_type: EventType,
        provider: &str,
        email: &str,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            provider: provider.to_string(),
            provider_message_id: None,
            email: normalise_email(email),
            campaign_id: None,
            occurred_at,
            reply: None,
            raw: serde_json::Value::Null,
        }
    }

    /// Attach the provider message id.
    #[must_use]
    pub fn with_message_id(mut self, id: &str) -> Self {
        self.provider_message_id = Some(id.to_string());
        self
    }

    /// Attach the campaign id.
    #[must_use]
    pub const fn with_campaign(mut self, campaign_id: Uuid) -> Self {
        self.campaign_id = Some(campaign_id);
        self
    }

    /// Attach a reply payload.
    #[must_use]
    pub fn with_reply(mut self, subject: Option<&str>, body: &str) -> Self {
        self.reply = Some(ReplyContent {
            subject: subject.map(ToString::to_string),
            body: body.to_string(),
        });
        self
    }

    /// Attach the raw provider payload.
    #[must_use]
    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = raw;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_is_normalised() {
        let event = NormalizedEvent::new(EventType::Opened, "postmark", "Bob@Ex.COM", Utc::now());
        assert_eq!(event.email, "bob@ex.com");
    }

    #[test]
    fn builder_attaches_fields() {
        let campaign = Uuid::new_v4();
        let event = NormalizedEvent::new(EventType::Replied, "lemlist", "a@b.c", Utc::now())
            .with_message_id("PM-7")
            .with_campaign(campaign)
            .with_reply(Some("Re: hello"), "sounds interesting");
        assert_eq!(event.provider_message_id.as_deref(), Some("PM-7"));
        assert_eq!(event.campaign_id, Some(campaign));
        assert_eq!(event.reply.expect("reply").body, "sounds interesting");
    }
}
