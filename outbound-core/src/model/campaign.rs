//! Campaign templates and launched instances.

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Outreach channel of a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Email only.
    Email,
    /// LinkedIn only.
    Linkedin,
    /// Email and LinkedIn stages mixed.
    Multi,
}

/// One message stage of a campaign sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageStage {
    /// Stage name, used in templates and analytics.
    pub name: String,

    /// Subject line (email stages).
    pub subject: Option<String>,

    /// Message body with personalization tokens (`{{first_name}}` etc.).
    pub body: String,

    /// Channel for this stage; falls back to the campaign channel.
    pub channel: Option<Channel>,

    /// Days to wait after the previous stage.
    pub wait_days: u32,
}

/// When enrolled contacts are first contacted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulePolicy {
    /// Send as soon as the enrolment lands.
    Immediate,

    /// Send on a cron schedule (6-field expressions:
    /// `sec min hour day_of_month month day_of_week`).
    Cron {
        /// Cron expression string.
        expression: String,
    },
}

impl SchedulePolicy {
    /// Next send instant at or after `now`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an unparseable cron expression.
    pub fn next_send_after(&self, now: DateTime<Utc>) -> CoreResult<DateTime<Utc>> {
        match self {
            Self::Immediate => Ok(now),
            Self::Cron { expression } => {
                let schedule = CronSchedule::from_str(expression).map_err(|e| {
                    CoreError::validation(format!("invalid cron expression {expression:?}: {e}"))
                })?;
                schedule
                    .after(&now)
                    .next()
                    .ok_or_else(|| CoreError::validation("cron schedule has no future firing"))
            }
        }
    }
}

/// Immutable campaign definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignTemplate {
    /// Stable id.
    pub id: Uuid,

    /// Template name.
    pub name: String,

    /// Ordered message stages.
    pub stages: Vec<MessageStage>,

    /// Campaign channel.
    pub channel: Channel,

    /// Schedule policy for launched instances.
    pub schedule: SchedulePolicy,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Lifecycle state of a launched campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignState {
    /// Created but not yet launched.
    Draft,
    /// Sending.
    Active,
    /// Temporarily stopped; may resume.
    Paused,
    /// Finished every stage for every enrolment.
    Completed,
    /// Aborted; terminal.
    Cancelled,
}

impl CampaignState {
    /// Whether moving to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Active)
                | (Self::Active, Self::Paused | Self::Completed | Self::Cancelled)
                | (Self::Paused, Self::Active | Self::Cancelled)
        )
    }

    /// Whether the state is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Lowercase state name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for CampaignState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A launched campaign template; owns its enrolments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignInstance {
    /// Stable id.
    pub id: Uuid,

    /// The template this instance was launched from.
    pub template_id: Uuid,

    /// Lifecycle state.
    pub state: CampaignState,

    /// Launch timestamp.
    pub created_at: DateTime<Utc>,

    /// Last state change.
    pub updated_at: DateTime<Utc>,
}

impl CampaignInstance {
    /// Launch a new instance in `Draft`.
    #[must_use]
    pub fn new(template_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            template_id,
            state: CampaignState::Draft,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a state transition, rejecting illegal ones.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the transition is not legal.
    pub fn transition_to(&mut self, next: CampaignState) -> CoreResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(CoreError::validation(format!(
                "illegal campaign transition {} -> {}",
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
    fn legal_lifecycle_path() {
        let mut instance = CampaignInstance::new(Uuid::new_v4());
        instance.transition_to(CampaignState::Active).expect("activate");
        instance.transition_to(CampaignState::Paused).expect("pause");
        instance.transition_to(CampaignState::Active).expect("resume");
        instance
            .transition_to(CampaignState::Completed)
            .expect("complete");
        assert!(instance.state.is_terminal());
    }

    #[test]
    fn draft_cannot_complete_directly() {
        let mut instance = CampaignInstance::new(Uuid::new_v4());
        assert!(instance.transition_to(CampaignState::Completed).is_err());
    }

    #[test]
    fn terminal_states_reject_transitions() {
        let mut instance = CampaignInstance::new(Uuid::new_v4());
        instance.transition_to(CampaignState::Active).expect("activate");
        instance
            .transition_to(CampaignState::Cancelled)
            .expect("cancel");
        assert!(instance.transition_to(CampaignState::Active).is_err());
    }

    #[test]
    fn immediate_schedule_fires_now() {
        let now = Utc::now();
        let at = SchedulePolicy::Immediate.next_send_after(now).expect("next");
        assert_eq!(at, now);
    }

    #[test]
    fn cron_schedule_fires_in_the_future() {
        let policy = SchedulePolicy::Cron {
            expression: "0 0 9 * * Mon-Fri".to_string(),
        };
        let now = Utc::now();
        let at = policy.next_send_after(now).expect("next");
        assert!(at > now);
    }

    #[test]
    fn invalid_cron_is_a_validation_error() {
        let policy = SchedulePolicy::Cron {
            expression: "not a cron".to_string(),
        };
        assert!(policy.next_send_after(Utc::now()).is_err());
    }
}
