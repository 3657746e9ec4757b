//! Pre-send quality gate.
//!
//! Every outbound message passes through [`QualityGate::score_outreach`]
//! before any provider call. The composite weighs data quality, message
//! quality and timing; hard-block findings force a block regardless of the
//! composite.

mod contact;
mod message;
mod mx;
mod timing;

pub use contact::{icp_title_score, validate_contact, ContactValidation};
pub use message::{score_message, DraftMessage, MessageScore};
pub use mx::{DohMxResolver, MxResolver, StaticMxResolver};
pub use timing::{score_timing, TimingContext, TimingScore};

use crate::error::CoreResult;
use crate::model::Contact;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Composite weights.
const DATA_WEIGHT: f64 = 0.4;
const MESSAGE_WEIGHT: f64 = 0.4;
const TIMING_WEIGHT: f64 = 0.2;

/// Thresholds for the recommendation bands.
const ALLOW_THRESHOLD: f64 = 70.0;
const WARN_THRESHOLD: f64 = 50.0;

/// What the gate recommends for a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recommendation {
    /// Send it.
    Allow,
    /// Send with a logged warning.
    Warn,
    /// Do not send.
    Block,
}

/// One prospective outreach to score.
#[derive(Debug, Clone)]
pub struct OutreachDraft {
    /// The recipient.
    pub contact: Contact,

    /// The rendered message.
    pub message: DraftMessage,

    /// The timing context (explicit clock input).
    pub timing: TimingContext,
}

/// Full scoring result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutreachScore {
    /// Weighted composite in `[0, 100]`.
    pub overall: f64,

    /// Data sub-score.
    pub data: f64,

    /// Message sub-score.
    pub message: f64,

    /// Timing sub-score.
    pub timing: f64,

    /// Gate decision.
    pub recommendation: Recommendation,

    /// All findings, hard blocks first.
    pub reasons: Vec<String>,
}

/// Aggregate counts for a scored batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounts {
    /// Drafts recommended for sending.
    pub allowed: usize,
    /// Drafts sent with a warning.
    pub warned: usize,
    /// Drafts blocked.
    pub blocked: usize,
}

/// Batch scoring result.
#[derive(Debug, Clone)]
pub struct BatchScores {
    /// Per-item scores, in input order.
    pub scores: Vec<OutreachScore>,
    /// Aggregate counts.
    pub counts: BatchCounts,
}

/// Map a composite score and hard-block state to a recommendation.
#[must_use]
pub fn recommendation_for(overall: f64, has_hard_block: bool) -> Recommendation {
    if has_hard_block {
        return Recommendation::Block;
    }
    if overall >= ALLOW_THRESHOLD {
        Recommendation::Allow
    } else if overall >= WARN_THRESHOLD {
        Recommendation::Warn
    } else {
        Recommendation::Block
    }
}

/// The pre-send quality gate.
#[derive(Clone)]
pub struct QualityGate {
    resolver: Arc<dyn MxResolver>,
}

impl QualityGate {
    /// Build the gate over an MX resolver.
    #[must_use]
    pub fn new(resolver: Arc<dyn MxResolver>) -> Self {
        Self { resolver }
    }

    fn combine(
        validation: &ContactValidation,
        message_score: &MessageScore,
        timing_score: &TimingScore,
    ) -> OutreachScore {
        let overall = DATA_WEIGHT * validation.score
            + MESSAGE_WEIGHT * message_score.score
            + TIMING_WEIGHT * timing_score.score;

        let mut reasons = Vec::new();
        reasons.extend(validation.hard_blocks.iter().cloned());
        reasons.extend(message_score.hard_blocks.iter().cloned());
        reasons.extend(validation.reasons.iter().cloned());
        reasons.extend(message_score.reasons.iter().cloned());
        reasons.extend(timing_score.reasons.iter().cloned());

        let has_hard_block =
            !validation.hard_blocks.is_empty() || !message_score.hard_blocks.is_empty();

        OutreachScore {
            overall,
            data: validation.score,
            message: message_score.score,
            timing: timing_score.score,
            recommendation: recommendation_for(overall, has_hard_block),
            reasons,
        }
    }

    /// Score one outreach draft.
    pub async fn score_outreach(&self, draft: &OutreachDraft) -> CoreResult<OutreachScore> {
        let validation = validate_contact(&draft.contact, self.resolver.as_ref()).await?;
        let message_score = score_message(&draft.contact, &draft.message);
        let timing_score = score_timing(&draft.timing);
        Ok(Self::combine(&validation, &message_score, &timing_score))
    }

    /// Score a batch: each unique contact is validated once (keyed by
    /// email), then items are scored in parallel against the cached
    /// validations.
    pub async fn score_batch(&self, drafts: &[OutreachDraft]) -> CoreResult<BatchScores> {
        let mut validations: HashMap<String, ContactValidation> = HashMap::new();
        for draft in drafts {
            if !validations.contains_key(&draft.contact.email) {
                let validation =
                    validate_contact(&draft.contact, self.resolver.as_ref()).await?;
                validations.insert(draft.contact.email.clone(), validation);
            }
        }

        let scores: Vec<OutreachScore> = join_all(drafts.iter().map(|draft| {
            let validation = validations
                .get(&draft.contact.email)
                .cloned()
                .unwrap_or_else(|| ContactValidation {
                    syntax_valid: false,
                    has_mx: false,
                    role_based: false,
                    disposable: false,
                    completeness: 0.0,
                    icp_score: 0.0,
                    score: 0.0,
                    reasons: Vec::new(),
                    hard_blocks: vec!["contact was never validated".to_string()],
                });
            async move {
                let message_score = score_message(&draft.contact, &draft.message);
                let timing_score = score_timing(&draft.timing);
                Self::combine(&validation, &message_score, &timing_score)
            }
        }))
        .await;

        let mut counts = BatchCounts::default();
        for score in &scores {
            match score.recommendation {
                Recommendation::Allow => counts.allowed += 1,
                Recommendation::Warn => counts.warned += 1,
                Recommendation::Block => counts.blocked += 1,
            }
        }
        Ok(BatchScores { scores, counts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreResult;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingResolver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MxResolver for CountingResolver {
        async fn has_mx(&self, _domain: &str) -> CoreResult<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    fn draft(email: &str) -> OutreachDraft {
        let mut contact = Contact::new(email);
        contact.name = Some("Jane Roe".to_string());
        contact.title = Some("VP of Engineering".to_string());
        contact.company = Some("Acme".to_string());
        contact.company_domain = Some("acme.com".to_string());
        contact.linkedin_url = Some("https://linkedin.com/in/janeroe".to_string());
        contact.phone = Some("+1 555 0100".to_string());
        contact.location = Some("Berlin".to_string());
        let filler = "We help teams like yours cut onboarding time in half without changing \
                      your existing tooling or processes at all. "
            .repeat(3);
        OutreachDraft {
            contact,
            message: DraftMessage {
                subject: Some("Quick question".to_string()),
                body: format!(
                    "Hi Jane, I noticed Acme is growing quickly. {filler} Would you be open \
                     to a quick chat next week? Happy to schedule around you."
                ),
            },
            timing: TimingContext::new(Utc::now(), 0, None),
        }
    }

    #[test]
    fn thresholds_sit_exactly_where_the_contract_says() {
        assert_eq!(recommendation_for(70.0, false), Recommendation::Allow);
        assert_eq!(recommendation_for(69.9, false), Recommendation::Warn);
        assert_eq!(recommendation_for(50.0, false), Recommendation::Warn);
        assert_eq!(recommendation_for(49.0, false), Recommendation::Block);
        assert_eq!(recommendation_for(100.0, true), Recommendation::Block);
    }

    #[tokio::test]
    async fn good_draft_is_allowed() {
        let gate = QualityGate::new(Arc::new(StaticMxResolver::accepting()));
        let score = gate.score_outreach(&draft("jane@acme.com")).await.expect("score");
        assert_eq!(score.recommendation, Recommendation::Allow);
        assert!(score.overall >= 70.0);
    }

    #[tokio::test]
    async fn hard_block_overrides_a_high_score() {
        let gate = QualityGate::new(Arc::new(StaticMxResolver::accepting()));
        let mut bad = draft("jane@acme.com");
        bad.message.body = format!("{} [insert case study]", bad.message.body);
        let score = gate.score_outreach(&bad).await.expect("score");
        assert_eq!(score.recommendation, Recommendation::Block);
    }

    #[tokio::test]
    async fn scoring_is_deterministic_for_the_same_clock() {
        let gate = QualityGate::new(Arc::new(StaticMxResolver::accepting()));
        let d = draft("jane@acme.com");
        let first = gate.score_outreach(&d).await.expect("score");
        let second = gate.score_outreach(&d).await.expect("score");
        assert!((first.overall - second.overall).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn batch_validates_each_unique_contact_once() {
        let resolver = Arc::new(CountingResolver {
            calls: AtomicUsize::new(0),
        });
        let gate = QualityGate::new(Arc::clone(&resolver) as Arc<dyn MxResolver>);

        let drafts = vec![
            draft("jane@acme.com"),
            draft("jane@acme.com"),
            draft("omar@globex.com"),
        ];
        let batch = gate.score_batch(&drafts).await.expect("batch");

        assert_eq!(batch.scores.len(), 3);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
        assert_eq!(batch.counts.allowed, 3);
    }
}
