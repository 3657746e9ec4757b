//! Enrolments: the (campaign instance × contact) association.

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of an enrolment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrolmentState {
    /// Created; first send not yet attempted.
    Pending,
    /// At least one message sent; sequence in progress.
    Active,
    /// The contact replied; sequence stops.
    Replied,
    /// The contact unsubscribed; terminal.
    Unsubscribed,
    /// A send hard-bounced; terminal.
    Bounced,
    /// Every stage was sent without a reply.
    Completed,
    /// A send failed permanently.
    Failed,
}

impl EnrolmentState {
    /// Whether the state is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Active)
    }

    /// Whether moving to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Pending => matches!(
                next,
                Self::Active | Self::Failed | Self::Unsubscribed | Self::Bounced
            ),
            Self::Active => matches!(
                next,
                Self::Replied | Self::Unsubscribed | Self::Bounced | Self::Completed | Self::Failed
            ),
            _ => false,
        }
    }

    /// Lowercase state name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Replied => "replied",
            Self::Unsubscribed => "unsubscribed",
            Self::Bounced => "bounced",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for EnrolmentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Tracks outreach progress for one contact within one campaign instance.
///
/// `(instance_id, contact_id)` is unique; the store enforces it with a
/// unique index and the enrol worker relies on that for idempotency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrolment {
    /// Stable id.
    pub id: Uuid,

    /// Owning campaign instance.
    pub instance_id: Uuid,

    /// Enrolled contact.
    pub contact_id: Uuid,

    /// Lifecycle state.
    pub state: EnrolmentState,

    /// Index of the next stage to send.
    pub current_stage: u32,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,

    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Enrolment {
    /// Create a pending enrolment.
    #[must_use]
    pub fn new(instance_id: Uuid, contact_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            instance_id,
            contact_id,
            state: EnrolmentState::Pending,
            current_stage: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a state transition, rejecting illegal ones.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the transition is not legal.
    pub fn transition_to(&mut self, next: EnrolmentState) -> CoreResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(CoreError::validation(format!(
                "illegal enrolment transition {} -> {}",
                self.state, next
            )));
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_activates_then_replies() {
        let mut enrolment = Enrolment::new(Uuid::new_v4(), Uuid::new_v4());
        enrolment.transition_to(EnrolmentState::Active).expect("activate");
        enrolment.transition_to(EnrolmentState::Replied).expect("reply");
        assert!(enrolment.state.is_terminal());
    }

    #[test]
    fn pending_cannot_jump_to_replied() {
        let mut enrolment = Enrolment::new(Uuid::new_v4(), Uuid::new_v4());
        assert!(enrolment.transition_to(EnrolmentState::Replied).is_err());
    }

    #[test]
    fn terminal_rejects_everything() {
        let mut enrolment = Enrolment::new(Uuid::new_v4(), Uuid::new_v4());
        enrolment.transition_to(EnrolmentState::Active).expect("activate");
        enrolment
            .transition_to(EnrolmentState::Unsubscribed)
            .expect("unsubscribe");
        assert!(enrolment.transition_to(EnrolmentState::Active).is_err());
    }
}
