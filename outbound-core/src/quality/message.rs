//! Outbound message scoring.

use crate::model::Contact;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Spam-filter trigger phrases.
const SPAM_TRIGGERS: &[&str] = &[
    "free money",
    "act now",
    "limited time",
    "click here",
    "100% free",
    "no obligation",
    "winner",
    "congratulations",
    "risk-free",
    "double your",
];

/// Leftover placeholder markers that must never reach a recipient.
const PLACEHOLDER_MARKERS: &[&str] = &["[insert", "lorem ipsum", "{{", "[name]", "[company]"];

/// Call-to-action keywords.
const CTA_KEYWORDS: &[&str] = &[
    "call", "chat", "meet", "demo", "schedule", "book", "reply", "thoughts", "interested",
    "available", "connect",
];

static CREDENTIAL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|api[_-]?key|secret|token)\s*[:=]\s*\S+").expect("valid regex")
});

static UNPROFESSIONAL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(wtf|omg|lol|sucks)\b").expect("valid regex"));

/// A draft message heading for the quality gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftMessage {
    /// Subject line, for email sends.
    pub subject: Option<String>,

    /// Rendered body.
    pub body: String,
}

/// Message scoring result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageScore {
    /// Composite message score in `[0, 100]`.
    pub score: f64,

    /// Human-readable findings.
    pub reasons: Vec<String>,

    /// Findings that force a block regardless of the composite score.
    pub hard_blocks: Vec<String>,
}

fn mentions_recipient(contact: &Contact, body_lower: &str) -> bool {
    let first_name = contact
        .name
        .as_deref()
        .and_then(|n| n.split_whitespace().next())
        .map(str::to_lowercase);
    let company = contact.company.as_deref().map(str::to_lowercase);
    first_name.is_some_and(|n| !n.is_empty() && body_lower.contains(&n))
        || company.is_some_and(|c| !c.is_empty() && body_lower.contains(&c))
}

/// Score a draft message for a specific recipient.
#[must_use]
pub fn score_message(contact: &Contact, message: &DraftMessage) -> MessageScore {
    let mut score = 0.0;
    let mut reasons = Vec::new();
    let mut hard_blocks = Vec::new();

    let body = message.body.trim();
    if body.is_empty() {
        hard_blocks.push("message has no content".to_string());
        return MessageScore {
            score: 0.0,
            reasons,
            hard_blocks,
        };
    }
    let body_lower = body.to_lowercase();

    // Personalization: the body references the recipient or their company.
    if mentions_recipient(contact, &body_lower) {
        score += 25.0;
    } else {
        reasons.push("no personalization detected".to_string());
    }

    // Length: cold outreach lands best between 50 and 125 words.
    let words = body.split_whitespace().count();
    if (50..=125).contains(&words) {
        score += 20.0;
    } else if (25..=200).contains(&words) {
        score += 10.0;
        reasons.push(format!("length of {words} words is outside the ideal band"));
    } else {
        reasons.push(format!("length of {words} words is far from the ideal band"));
    }

    // Call to action.
    if CTA_KEYWORDS.iter().any(|kw| body_lower.contains(kw)) {
        score += 15.0;
    } else {
        reasons.push("no call to action".to_string());
    }

    // Spam triggers.
    let triggers: Vec<&str> = SPAM_TRIGGERS
        .iter()
        .filter(|t| body_lower.contains(*t))
        .copied()
        .collect();
    if triggers.is_empty() {
        score += 20.0;
    } else {
        reasons.push(format!("spam triggers present: {}", triggers.join(", ")));
    }

    // Placeholder leftovers are a hard block.
    if let Some(marker) = PLACEHOLDER_MARKERS
        .iter()
        .find(|m| body_lower.contains(*m))
    {
        hard_blocks.push(format!("placeholder text {marker:?} left in message"));
    } else {
        score += 10.0;
    }

    // Credential-like or unprofessional content.
    if CREDENTIAL_PATTERN.is_match(body) {
        hard_blocks.push("credential-like pattern in message".to_string());
    } else if UNPROFESSIONAL_PATTERN.is_match(body) {
        reasons.push("unprofessional language".to_string());
    } else {
        score += 10.0;
    }

    MessageScore {
        score,
        reasons,
        hard_blocks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact() -> Contact {
        let mut contact = Contact::new("jane@acme.com");
        contact.name = Some("Jane Roe".to_string());
        contact.company = Some("Acme".to_string());
        contact
    }

    fn good_body() -> String {
        let filler = "We help teams like yours cut onboarding time in half without changing \
                      your existing tooling or processes at all. "
            .repeat(3);
        format!("Hi Jane, I noticed Acme is growing quickly. {filler} Would you be open to a \
                 quick chat next week? Happy to schedule around you.")
    }

    #[test]
    fn well_formed_message_scores_full_marks() {
        let score = score_message(
            &contact(),
            &DraftMessage {
                subject: Some("Quick question".to_string()),
                body: good_body(),
            },
        );
        assert!(score.hard_blocks.is_empty(), "{:?}", score.hard_blocks);
        assert!((score.score - 100.0).abs() < f64::EPSILON, "{}", score.score);
    }

    #[test]
    fn empty_body_is_a_hard_block() {
        let score = score_message(
            &contact(),
            &DraftMessage {
                subject: None,
                body: "   ".to_string(),
            },
        );
        assert!(!score.hard_blocks.is_empty());
        assert!(score.score.abs() < f64::EPSILON);
    }

    #[test]
    fn placeholder_text_is_a_hard_block() {
        let score = score_message(
            &contact(),
            &DraftMessage {
                subject: None,
                body: "Hi [name], quick chat about {{company}}?".to_string(),
            },
        );
        assert!(score
            .hard_blocks
            .iter()
            .any(|b| b.contains("placeholder")));
    }

    #[test]
    fn credential_patterns_are_a_hard_block() {
        let score = score_message(
            &contact(),
            &DraftMessage {
                subject: None,
                body: format!("{} Also our api_key = sk-live-123", good_body()),
            },
        );
        assert!(score
            .hard_blocks
            .iter()
            .any(|b| b.contains("credential")));
    }

    #[test]
    fn spam_triggers_cost_points() {
        let spammy = format!("{} Act now, risk-free, winner!", good_body());
        let score = score_message(
            &contact(),
            &DraftMessage {
                subject: None,
                body: spammy,
            },
        );
        assert!(score.score < 100.0);
        assert!(score.reasons.iter().any(|r| r.contains("spam")));
    }

    #[test]
    fn impersonal_message_loses_personalization_points() {
        let body = "Hello there, we sell software. Would you be open to a quick chat about a \
                    demo next week? We think you could benefit from our product quite a bit, \
                    and the onboarding only takes a day for most teams we work with, honestly. \
                    Many companies in your space already rely on us daily for this workflow."
            .to_string();
        let score = score_message(&contact(), &DraftMessage { subject: None, body });
        assert!(score.reasons.iter().any(|r| r.contains("personalization")));
    }
}
