//! Core job types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::JobStatus;

/// Unique identifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    /// Create a new random job id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<JobId> for Uuid {
    fn from(id: JobId) -> Self {
        id.0
    }
}

/// The set of background operations the pool knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    /// Contact list import.
    Import,
    /// Contact/company enrichment.
    Enrich,
    /// CRM synchronisation.
    CrmSync,
    /// Campaign enrolment.
    Enrol,
    /// Internal scheduled tick (campaign schedules, stale-lease reaping).
    Tick,
}

impl JobType {
    /// Kebab-case type name, as used in the HTTP path.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Import => "import",
            Self::Enrich => "enrich",
            Self::CrmSync => "crm-sync",
            Self::Enrol => "enrol",
            Self::Tick => "tick",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parse a job type from its path segment.
impl FromStr for JobType {
    type Err = crate::error::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "import" => Ok(Self::Import),
            "enrich" => Ok(Self::Enrich),
            "crm-sync" => Ok(Self::CrmSync),
            "enrol" => Ok(Self::Enrol),
            "tick" => Ok(Self::Tick),
            other => Err(crate::error::CoreError::validation(format!(
                "unknown job type {other:?}"
            ))),
        }
    }
}

/// Job priority; higher runs first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background housekeeping.
    Low,
    /// Default.
    #[default]
    Normal,
    /// User-facing operations.
    High,
    /// Drop-everything work.
    Critical,
}

impl Priority {
    /// Numeric rank used for store ordering.
    #[must_use]
    pub const fn rank(self) -> i16 {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }

    /// Inverse of [`Priority::rank`].
    #[must_use]
    pub const fn from_rank(rank: i16) -> Self {
        match rank {
            0 => Self::Low,
            2 => Self::High,
            3 => Self::Critical,
            _ => Self::Normal,
        }
    }
}

/// A durable unit of background work.
///
/// At most one worker holds the lease of a job at any time; claims are
/// atomic at the store level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Stable id.
    pub id: JobId,

    /// Which worker runs this job.
    pub job_type: JobType,

    /// Priority; ties broken by earliest `created_at`.
    pub priority: Priority,

    /// Opaque parameters, deserialized by the worker.
    pub params: serde_json::Value,

    /// Lifecycle status.
    pub status: JobStatus,

    /// Progress fraction in `[0, 1]`.
    pub progress: f64,

    /// Number of times the job was claimed.
    pub attempts: u32,

    /// Enqueue timestamp.
    pub created_at: DateTime<Utc>,

    /// First claim timestamp.
    pub started_at: Option<DateTime<Utc>>,

    /// Terminal-state timestamp.
    pub completed_at: Option<DateTime<Utc>>,

    /// Worker result, for completed jobs.
    pub result: Option<serde_json::Value>,

    /// Error message, for failed jobs.
    pub error: Option<String>,

    /// Lease id of the worker currently processing the job.
    pub lease: Option<Uuid>,

    /// When the lease goes stale and the job becomes re-claimable.
    pub lease_expires_at: Option<DateTime<Utc>>,

    /// Cooperative cancellation flag, observed at batch boundaries.
    pub cancel_requested: bool,
}

impl JobRecord {
    /// Create a pending job.
    #[must_use]
    pub fn new(job_type: JobType, params: serde_json::Value, priority: Priority) -> Self {
        Self {
            id: JobId::new(),
            job_type,
            priority,
            params,
            status: JobStatus::Pending,
            progress: 0.0,
            attempts: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            lease: None,
            lease_expires_at: None,
            cancel_requested: false,
        }
    }
}

/// Listing filter for the admin surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobFilter {
    /// Restrict to one status.
    pub status: Option<JobStatus>,

    /// Restrict to one job type.
    pub job_type: Option<JobType>,

    /// Maximum rows returned.
    pub limit: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_type_round_trips_through_str() {
        for (name, job_type) in [
            ("import", JobType::Import),
            ("enrich", JobType::Enrich),
            ("crm-sync", JobType::CrmSync),
            ("enrol", JobType::Enrol),
            ("tick", JobType::Tick),
        ] {
            assert_eq!(job_type.as_str(), name);
            assert_eq!(name.parse::<JobType>().expect("parse"), job_type);
        }
        assert!("nope".parse::<JobType>().is_err());
    }

    #[test]
    fn priority_orders_low_to_critical() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        for p in [
            Priority::Low,
            Priority::Normal,
            Priority::High,
            Priority::Critical,
        ] {
            assert_eq!(Priority::from_rank(p.rank()), p);
        }
    }

    #[test]
    fn new_job_is_pending() {
        let job = JobRecord::new(JobType::Import, serde_json::json!({}), Priority::Normal);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert!(job.lease.is_none());
    }
}
