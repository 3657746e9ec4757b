//! Safety validation of generated replies.

use once_cell::sync::Lazy;
use regex::Regex;

/// Minimum reply length in characters.
pub const MIN_REPLY_CHARS: usize = 20;

/// Maximum reply length in characters.
pub const MAX_REPLY_CHARS: usize = 2_000;

const PLACEHOLDER_MARKERS: &[&str] = &["[insert", "lorem ipsum", "{{", "[name]", "[company]"];

const RISKY_PROMISES: &[&str] = &[
    "we guarantee",
    "guaranteed",
    "100% success",
    "full refund",
    "free forever",
    "no risk at all",
    "legally binding",
];

const UNPROFESSIONAL: &[&str] = &["wtf", "lol", "omg", "stupid", "idiot", "sucks"];

static CREDENTIAL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|api[_-]?key|secret|token|bearer)\s*[:=]\s*\S+")
        .expect("valid credential regex")
});

/// Validate a generated reply before it may be sent.
///
/// # Errors
///
/// Returns every violated rule; one violation is enough to block the send.
pub fn validate_reply(text: &str) -> Result<(), Vec<String>> {
    let mut violations = Vec::new();
    let trimmed = text.trim();
    let lower = trimmed.to_lowercase();

    if trimmed.chars().count() < MIN_REPLY_CHARS {
        violations.push(format!(
            "reply shorter than {MIN_REPLY_CHARS} characters"
        ));
    }
    if trimmed.chars().count() > MAX_REPLY_CHARS {
        violations.push(format!("reply longer than {MAX_REPLY_CHARS} characters"));
    }
    if CREDENTIAL_PATTERN.is_match(trimmed) {
        violations.push("credential-like pattern in reply".to_string());
    }
    for marker in PLACEHOLDER_MARKERS {
        if lower.contains(marker) {
            violations.push(format!("placeholder text {marker:?} in reply"));
        }
    }
    for promise in RISKY_PROMISES {
        if lower.contains(promise) {
            violations.push(format!("risky promise {promise:?} in reply"));
        }
    }
    for word in UNPROFESSIONAL {
        if lower
            .split(|c: char| !c.is_alphanumeric())
            .any(|token| token == *word)
        {
            violations.push(format!("unprofessional language {word:?} in reply"));
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensible_reply_passes() {
        let reply = "Thanks for getting back to me. Happy to walk you through how the \
                     integration works; would Tuesday morning suit you?";
        assert!(validate_reply(reply).is_ok());
    }

    #[test]
    fn short_reply_is_rejected() {
        let violations = validate_reply("ok thanks").unwrap_err();
        assert!(violations.iter().any(|v| v.contains("shorter")));
    }

    #[test]
    fn oversized_reply_is_rejected() {
        let reply = "a".repeat(MAX_REPLY_CHARS + 1);
        let violations = validate_reply(&reply).unwrap_err();
        assert!(violations.iter().any(|v| v.contains("longer")));
    }

    #[test]
    fn credentials_are_rejected() {
        let reply = "Sure, just use api_key: sk-live-42 to get started with the trial today.";
        let violations = validate_reply(reply).unwrap_err();
        assert!(violations.iter().any(|v| v.contains("credential")));
    }

    #[test]
    fn placeholders_are_rejected() {
        let reply = "Hi [name], thanks for your interest in our product and our team here.";
        let violations = validate_reply(reply).unwrap_err();
        assert!(violations.iter().any(|v| v.contains("placeholder")));
    }

    #[test]
    fn risky_promises_are_rejected() {
        let reply = "We guarantee you will double your pipeline in thirty days or less.";
        let violations = validate_reply(reply).unwrap_err();
        assert!(violations.iter().any(|v| v.contains("risky promise")));
    }

    #[test]
    fn unprofessional_language_is_rejected() {
        let reply = "Honestly their product sucks, ours is better in every way you can imagine.";
        let violations = validate_reply(reply).unwrap_err();
        assert!(violations.iter().any(|v| v.contains("unprofessional")));
    }
}
