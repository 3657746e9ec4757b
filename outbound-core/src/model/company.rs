//! Companies, keyed by domain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Firmographic record, weak-referenced by contacts through
/// `company_domain`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    /// Primary key.
    pub domain: String,

    /// Company name.
    pub name: Option<String>,

    /// Industry label.
    pub industry: Option<String>,

    /// Annual revenue, when the enrichment provider reports one.
    pub revenue: Option<i64>,

    /// Headcount.
    pub employees: Option<i64>,

    /// Detected technology stack.
    pub technologies: Vec<String>,

    /// Latest funding stage.
    pub funding_stage: Option<String>,

    /// Buying signals (hiring spikes, new offices, leadership changes).
    pub signals: Vec<String>,

    /// Last enrichment timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Company {
    /// Create an empty company record for a domain.
    #[must_use]
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.trim().to_lowercase(),
            name: None,
            industry: None,
            revenue: None,
            employees: None,
            technologies: Vec::new(),
            funding_stage: None,
            signals: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}
