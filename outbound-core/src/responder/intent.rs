//! Intent and sentiment classification for inbound replies.
//!
//! Pattern rules, not ML. Order matters: opt-outs are checked before
//! interest so "not interested" never reads as "interested".

use crate::model::ReplySentiment;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Classified intent of an inbound reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Auto-reply while away.
    OutOfOffice,
    /// Opt-out or rejection.
    NotInterested,
    /// The lead wants to talk.
    MeetingRequest,
    /// Pushback (price, timing, incumbent vendor).
    Objection,
    /// A question about the product or offer.
    Question,
    /// Positive interest without a concrete ask.
    Interested,
    /// Anything else; a plain follow-up.
    FollowUp,
}

impl Intent {
    /// Snake-case intent name, as used in `responder.excluded_intents`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OutOfOffice => "out_of_office",
            Self::NotInterested => "not_interested",
            Self::MeetingRequest => "meeting_request",
            Self::Objection => "objection",
            Self::Question => "question",
            Self::Interested => "interested",
            Self::FollowUp => "follow_up",
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classification result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentClassification {
    /// Detected intent.
    pub intent: Intent,

    /// Detected sentiment.
    pub sentiment: ReplySentiment,

    /// Competitor mentioned in an objection, when one was extracted.
    pub competitor: Option<String>,
}

const OUT_OF_OFFICE: &[&str] = &[
    "out of office",
    "annual leave",
    "on vacation",
    "on holiday",
    "parental leave",
    "auto-reply",
    "automatic reply",
    "back in the office on",
];

const NOT_INTERESTED: &[&str] = &[
    "not interested",
    "no thanks",
    "remove me",
    "unsubscribe",
    "stop emailing",
    "stop contacting",
    "take me off",
    "no longer interested",
    "please remove",
    "don't contact",
];

const MEETING_REQUEST: &[&str] = &[
    "let's meet",
    "book a call",
    "schedule a call",
    "set up a call",
    "calendly",
    "my calendar",
    "available on",
    "happy to meet",
    "grab some time",
];

const OBJECTION: &[&str] = &[
    "too expensive",
    "no budget",
    "budget for this",
    "we already use",
    "we currently use",
    "happy with our",
    "under contract",
    "not the right time",
    "bad timing",
];

const QUESTION: &[&str] = &[
    "how much",
    "how does",
    "what does",
    "what's the price",
    "pricing",
    "what is the cost",
    "does it integrate",
    "is it compliant",
];

const INTERESTED: &[&str] = &[
    "interested",
    "tell me more",
    "sounds good",
    "sounds interesting",
    "learn more",
    "more information",
    "send me details",
    "intrigued",
];

static COMPETITOR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)we (?:already |currently )?use ([A-Za-z][A-Za-z0-9_-]+)")
        .expect("valid competitor regex")
});

fn matches_any(text: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| text.contains(p))
}

/// Classify an inbound reply body.
#[must_use]
pub fn classify(body: &str) -> IntentClassification {
    let text = body.to_lowercase();

    if matches_any(&text, OUT_OF_OFFICE) {
        return IntentClassification {
            intent: Intent::OutOfOffice,
            sentiment: ReplySentiment::Neutral,
            competitor: None,
        };
    }
    if matches_any(&text, NOT_INTERESTED) {
        return IntentClassification {
            intent: Intent::NotInterested,
            sentiment: ReplySentiment::Negative,
            competitor: None,
        };
    }
    if matches_any(&text, MEETING_REQUEST) {
        return IntentClassification {
            intent: Intent::MeetingRequest,
            sentiment: ReplySentiment::Positive,
            competitor: None,
        };
    }
    if matches_any(&text, OBJECTION) {
        let competitor = COMPETITOR_PATTERN
            .captures(body)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
        return IntentClassification {
            intent: Intent::Objection,
            sentiment: ReplySentiment::Objection,
            competitor,
        };
    }
    if matches_any(&text, QUESTION) || (text.contains('?') && matches_any(&text, &["what", "how"]))
    {
        return IntentClassification {
            intent: Intent::Question,
            sentiment: ReplySentiment::Neutral,
            competitor: None,
        };
    }
    if matches_any(&text, INTERESTED) {
        return IntentClassification {
            intent: Intent::Interested,
            sentiment: ReplySentiment::Positive,
            competitor: None,
        };
    }
    IntentClassification {
        intent: Intent::FollowUp,
        sentiment: ReplySentiment::Neutral,
        competitor: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removal_request_is_not_interested_and_negative() {
        let result = classify("Please remove me from this list.");
        assert_eq!(result.intent, Intent::NotInterested);
        assert_eq!(result.sentiment, ReplySentiment::Negative);
    }

    #[test]
    fn not_interested_beats_interested_substring() {
        let result = classify("Sorry, I'm not interested at this time.");
        assert_eq!(result.intent, Intent::NotInterested);
    }

    #[test]
    fn meeting_requests_are_positive() {
        let result = classify("Sounds relevant, can we schedule a call next week?");
        assert_eq!(result.intent, Intent::MeetingRequest);
        assert_eq!(result.sentiment, ReplySentiment::Positive);
    }

    #[test]
    fn objection_extracts_the_competitor() {
        let result = classify("Thanks, but we already use Salesforce for this.");
        assert_eq!(result.intent, Intent::Objection);
        assert_eq!(result.sentiment, ReplySentiment::Objection);
        assert_eq!(result.competitor.as_deref(), Some("Salesforce"));
    }

    #[test]
    fn out_of_office_is_detected_first() {
        let result = classify(
            "I am out of office until Monday. For urgent matters please call our office.",
        );
        assert_eq!(result.intent, Intent::OutOfOffice);
    }

    #[test]
    fn questions_are_neutral() {
        let result = classify("How much does this cost for a 50-seat team?");
        assert_eq!(result.intent, Intent::Question);
        assert_eq!(result.sentiment, ReplySentiment::Neutral);
    }

    #[test]
    fn plain_interest_is_positive() {
        let result = classify("This sounds interesting, tell me more.");
        assert_eq!(result.intent, Intent::Interested);
    }

    #[test]
    fn everything_else_is_follow_up() {
        let result = classify("Thanks, I'll get back to you.");
        assert_eq!(result.intent, Intent::FollowUp);
        assert_eq!(result.sentiment, ReplySentiment::Neutral);
    }
}
