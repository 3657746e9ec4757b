//! Per-message outreach outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sentiment of a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplySentiment {
    /// Positive engagement.
    Positive,
    /// Neutral.
    Neutral,
    /// Negative.
    Negative,
    /// An objection (price, timing, competitor).
    Objection,
}

impl ReplySentiment {
    /// Lowercase sentiment name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Neutral => "neutral",
            Self::Negative => "negative",
            Self::Objection => "objection",
        }
    }
}

/// One row per sent message, linked to an enrolment. Counters are monotonic;
/// events for the same provider message apply last-writer-wins per counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutreachOutcome {
    /// Stable id.
    pub id: Uuid,

    /// Owning enrolment.
    pub enrolment_id: Uuid,

    /// Provider message id returned by the send.
    pub provider_message_id: String,

    /// Template/stage name that was sent.
    pub template_used: String,

    /// Subject line, for email sends.
    pub subject_line: Option<String>,

    /// Persona used to write the message.
    pub persona: Option<String>,

    /// Send timestamp.
    pub sent_at: DateTime<Utc>,

    /// Number of opens observed.
    pub open_count: i64,

    /// Number of clicks observed.
    pub click_count: i64,

    /// Whether the contact replied.
    pub replied: bool,

    /// Whether a meeting was booked from this message.
    pub meeting_booked: bool,

    /// Whether the send bounced.
    pub bounced: bool,

    /// Whether the contact unsubscribed.
    pub unsubscribed: bool,

    /// First open timestamp (the original event's `occurred_at`).
    pub first_opened_at: Option<DateTime<Utc>>,

    /// Reply timestamp.
    pub replied_at: Option<DateTime<Utc>>,

    /// Reply sentiment, when classified.
    pub reply_sentiment: Option<ReplySentiment>,
}

impl OutreachOutcome {
    /// Record a fresh send.
    #[must_use]
    pub fn new(enrolment_id: Uuid, provider_message_id: &str, template_used: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            enrolment_id,
            provider_message_id: provider_message_id.to_string(),
            template_used: template_used.to_string(),
            subject_line: None,
            persona: None,
            sent_at: Utc::now(),
            open_count: 0,
            click_count: 0,
            replied: false,
            meeting_booked: false,
            bounced: false,
            unsubscribed: false,
            first_opened_at: None,
            replied_at: None,
            reply_sentiment: None,
        }
    }
}
