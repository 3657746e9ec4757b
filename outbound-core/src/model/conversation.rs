//! Conversation threads and messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Channel, ReplySentiment};

/// Direction of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageDirection {
    /// From the lead to us.
    Inbound,
    /// From us to the lead.
    Outbound,
}

/// One thread per `(lead_email, campaign_id)`.
///
/// `ai_responses_count` is the authoritative, durable per-thread cap counter
/// (invariant: never exceeds the configured maximum).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationThread {
    /// Stable id.
    pub id: Uuid,

    /// Lead's normalised email.
    pub lead_email: String,

    /// Campaign the conversation belongs to.
    pub campaign_id: Uuid,

    /// Channel the thread lives on; replies stay on this channel.
    pub channel: Channel,

    /// Number of AI-generated responses sent on this thread.
    pub ai_responses_count: u32,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,

    /// Last message timestamp.
    pub updated_at: DateTime<Utc>,
}

impl ConversationThread {
    /// Create an empty thread.
    #[must_use]
    pub fn new(lead_email: &str, campaign_id: Uuid, channel: Channel) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            lead_email: super::normalise_email(lead_email),
            campaign_id,
            channel,
            ai_responses_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A single message within a thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Stable id.
    pub id: Uuid,

    /// Owning thread.
    pub thread_id: Uuid,

    /// Direction.
    pub direction: MessageDirection,

    /// Body text.
    pub content: String,

    /// Subject, for email messages.
    pub subject: Option<String>,

    /// Classified sentiment (inbound messages).
    pub sentiment: Option<ReplySentiment>,

    /// Classified intent (inbound messages).
    pub detected_intent: Option<String>,

    /// Timestamp.
    pub created_at: DateTime<Utc>,
}

impl ConversationMessage {
    /// Record an inbound message.
    #[must_use]
    pub fn inbound(thread_id: Uuid, content: &str, subject: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4(),
            thread_id,
            direction: MessageDirection::Inbound,
            content: content.to_string(),
            subject: subject.map(ToString::to_string),
            sentiment: None,
            detected_intent: None,
            created_at: Utc::now(),
        }
    }

    /// Record an outbound message.
    #[must_use]
    pub fn outbound(thread_id: Uuid, content: &str, subject: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4(),
            thread_id,
            direction: MessageDirection::Outbound,
            content: content.to_string(),
            subject: subject.map(ToString::to_string),
            sentiment: None,
            detected_intent: None,
            created_at: Utc::now(),
        }
    }
}
