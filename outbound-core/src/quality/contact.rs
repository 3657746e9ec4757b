//! Contact data validation and scoring.

use super::mx::MxResolver;
use crate::error::CoreResult;
use crate::model::Contact;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::ValidateEmail;

/// Role-based mailbox prefixes that rarely reach a person.
const ROLE_PREFIXES: &[&str] = &[
    "info", "sales", "support", "admin", "contact", "hello", "office", "billing", "marketing",
    "team", "help", "noreply", "no-reply", "careers", "hr",
];

/// Well-known disposable-mail domains.
const DISPOSABLE_DOMAINS: &[&str] = &[
    "mailinator.com",
    "guerrillamail.com",
    "10minutemail.com",
    "tempmail.com",
    "yopmail.com",
    "trashmail.com",
    "sharklasers.com",
    "getnada.com",
    "dispostable.com",
    "maildrop.cc",
];

/// Title tiers for ideal-customer-profile matching, best first.
static ICP_TIERS: Lazy<Vec<(Regex, f64)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(
                r"(?i)\b(chief|ceo|cto|cfo|coo|cmo|cro|founder|co-founder|president|vp|vice president|head of|director)\b",
            )
            .expect("valid tier-1 regex"),
            30.0,
        ),
        (
            Regex::new(r"(?i)\b(manager|lead|principal|staff)\b").expect("valid tier-2 regex"),
            20.0,
        ),
        (
            Regex::new(r"(?i)\b(engineer|developer|analyst|consultant|specialist|architect)\b")
                .expect("valid tier-3 regex"),
            10.0,
        ),
    ]
});

/// Result of validating a contact's data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactValidation {
    /// Whether the email parses at all; `false` is a hard block.
    pub syntax_valid: bool,

    /// Whether the domain publishes MX records.
    pub has_mx: bool,

    /// Whether the mailbox is a role address (info@, sales@, …).
    pub role_based: bool,

    /// Whether the domain is a disposable-mail service.
    pub disposable: bool,

    /// Profile completeness in `[0, 1]`.
    pub completeness: f64,

    /// ICP title score contribution (0, 10, 20 or 30).
    pub icp_score: f64,

    /// Composite data score in `[0, 100]`.
    pub score: f64,

    /// Human-readable findings.
    pub reasons: Vec<String>,

    /// Findings that force a block regardless of the composite score.
    pub hard_blocks: Vec<String>,
}

fn completeness_of(contact: &Contact) -> f64 {
    let fields = [
        contact.name.is_some(),
        contact.title.is_some(),
        contact.company.is_some(),
        contact.company_domain.is_some(),
        contact.linkedin_url.is_some(),
        contact.phone.is_some(),
        contact.location.is_some(),
    ];
    let filled = fields.iter().filter(|present| **present).count();
    filled as f64 / fields.len() as f64
}

/// Score a title against the ICP tiers.
#[must_use]
pub fn icp_title_score(title: Option<&str>) -> f64 {
    let Some(title) = title else { return 0.0 };
    ICP_TIERS
        .iter()
        .find(|(regex, _)| regex.is_match(title))
        .map_or(0.0, |(_, score)| *score)
}

/// Validate a contact: syntax, MX, role prefix, disposable domain,
/// completeness and ICP tier.
///
/// # Errors
///
/// Propagates resolver failures; a domain without MX records is a finding,
/// not an error.
pub async fn validate_contact(
    contact: &Contact,
    resolver: &dyn MxResolver,
) -> CoreResult<ContactValidation> {
    let mut reasons = Vec::new();
    let mut hard_blocks = Vec::new();

    let syntax_valid = contact.email.validate_email();
    if !syntax_valid {
        hard_blocks.push(format!("invalid email address {:?}", contact.email));
    }

    let domain = contact.email_domain().unwrap_or_default().to_string();
    let has_mx = if syntax_valid {
        resolver.has_mx(&domain).await?
    } else {
        false
    };
    if syntax_valid && !has_mx {
        reasons.push(format!("domain {domain} has no MX records"));
    }

    let local_part = contact.email.split_once('@').map_or("", |(local, _)| local);
    let role_based = ROLE_PREFIXES.contains(&local_part);
    if role_based {
        reasons.push(format!("role-based mailbox {local_part}@"));
    }

    let disposable = DISPOSABLE_DOMAINS.contains(&domain.as_str());
    if disposable {
        reasons.push(format!("disposable domain {domain}"));
    }

    let completeness = completeness_of(contact);
    if completeness < 0.5 {
        reasons.push("sparse profile, consider enrichment first".to_string());
    }

    let icp_score = icp_title_score(contact.title.as_deref());

    let mut score = 0.0;
    if syntax_valid {
        if has_mx {
            score += 25.0;
        }
        if !role_based {
            score += 10.0;
        }
        if !disposable {
            score += 10.0;
        }
        score += completeness * 25.0;
        score += icp_score;
    }

    Ok(ContactValidation {
        syntax_valid,
        has_mx,
        role_based,
        disposable,
        completeness,
        icp_score,
        score,
        reasons,
        hard_blocks,
    })
}

#[cfg(test)]
mod tests {
    use super::super::mx::StaticMxResolver;
    use super::*;

    fn full_contact() -> Contact {
        let mut contact = Contact::new("jane@acme.com");
        contact.name = Some("Jane Roe".to_string());
        contact.title = Some("VP of Engineering".to_string());
        contact.company = Some("Acme".to_string());
        contact.company_domain = Some("acme.com".to_string());
        contact.linkedin_url = Some("https://linkedin.com/in/janeroe".to_string());
        contact.phone = Some("+1 555 0100".to_string());
        contact.location = Some("Berlin".to_string());
        contact
    }

    #[tokio::test]
    async fn complete_senior_contact_scores_full_marks() {
        let validation = validate_contact(&full_contact(), &StaticMxResolver::accepting())
            .await
            .expect("validate");
        assert!(validation.syntax_valid);
        assert!((validation.completeness - 1.0).abs() < f64::EPSILON);
        assert!((validation.icp_score - 30.0).abs() < f64::EPSILON);
        assert!((validation.score - 100.0).abs() < f64::EPSILON);
        assert!(validation.hard_blocks.is_empty());
    }

    #[tokio::test]
    async fn invalid_email_is_a_hard_block_with_zero_score() {
        let mut contact = full_contact();
        contact.email = "not-an-email".to_string();
        let validation = validate_contact(&contact, &StaticMxResolver::accepting())
            .await
            .expect("validate");
        assert!(!validation.syntax_valid);
        assert!(!validation.hard_blocks.is_empty());
        assert!(validation.score.abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn role_and_disposable_mailboxes_lose_points() {
        let mut contact = full_contact();
        contact.email = "sales@mailinator.com".to_string();
        let validation = validate_contact(&contact, &StaticMxResolver::accepting())
            .await
            .expect("validate");
        assert!(validation.role_based);
        assert!(validation.disposable);
        assert!((validation.score - 80.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn missing_mx_costs_25_points() {
        let validation = validate_contact(&full_contact(), &StaticMxResolver::rejecting())
            .await
            .expect("validate");
        assert!(!validation.has_mx);
        assert!((validation.score - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn icp_tiers_rank_titles() {
        assert!((icp_title_score(Some("Chief Revenue Officer")) - 30.0).abs() < f64::EPSILON);
        assert!((icp_title_score(Some("Head of Data")) - 30.0).abs() < f64::EPSILON);
        assert!((icp_title_score(Some("Engineering Manager")) - 20.0).abs() < f64::EPSILON);
        assert!((icp_title_score(Some("Software Engineer")) - 10.0).abs() < f64::EPSILON);
        assert!(icp_title_score(Some("Barista")).abs() < f64::EPSILON);
        assert!(icp_title_score(None).abs() < f64::EPSILON);
    }
}
