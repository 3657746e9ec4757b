//! Contacts, keyed by normalised email.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Normalise an email address for use as a contact key.
///
/// Lowercased and trimmed; the surrounding whitespace some CSV exports carry
/// must never produce distinct contacts.
#[must_use]
pub fn normalise_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// A person the pipeline reaches out to.
///
/// Created by import, mutated by enrichment, never deleted by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    /// Stable id.
    pub id: Uuid,

    /// Normalised lowercase email; unique across contacts.
    pub email: String,

    /// Full name, when known.
    pub name: Option<String>,

    /// Job title, when known.
    pub title: Option<String>,

    /// Company name, when known.
    pub company: Option<String>,

    /// Company domain; weak reference into the companies table.
    pub company_domain: Option<String>,

    /// LinkedIn profile URL.
    pub linkedin_url: Option<String>,

    /// Phone number.
    pub phone: Option<String>,

    /// Free-form location.
    pub location: Option<String>,

    /// Structured enrichment blob from the enrichment provider.
    pub enrichment: Option<serde_json::Value>,

    /// Data quality score in `[0, 1]`, computed by the enrichment worker.
    pub data_quality_score: f64,

    /// Ideal-customer-profile score.
    pub icp_score: f64,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,

    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    /// Create a fresh contact from a raw email plus optional attributes.
    ///
    /// The email is normalised; everything else starts empty.
    #[must_use]
    pub fn new(email: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email: normalise_email(email),
            name: None,
            title: None,
            company: None,
            company_domain: None,
            linkedin_url: None,
            phone: None,
            location: None,
            enrichment: None,
            data_quality_score: 0.0,
            icp_score: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Domain part of the email, when present.
    #[must_use]
    pub fn email_domain(&self) -> Option<&str> {
        self.email.split_once('@').map(|(_, domain)| domain)
    }
}
