//! PII redaction applied to every input/reply pair before it reaches the
//! audit log.
//!
//! Redaction runs after the response is chosen, so it can never change what
//! the user sees; it only controls what gets persisted. When redaction cannot
//! run safely the pair is replaced with a placeholder rather than stored raw.

use std::sync::LazyLock;

use regex::Regex;

use fokus_core::chat::RedactionStatus;

/// Inputs beyond this are refused rather than scanned.
const MAX_REDACTION_LEN: usize = 20_000;

pub const REDACTION_PLACEHOLDER: &str = "[content withheld: redaction failed]";

struct Rule {
    regex: Regex,
    replacement: &'static str,
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    let raw: &[(&str, &str)] = &[
        (
            r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
            "[redacted-email]",
        ),
        // Uzbek and international phone formats, 9+ digits with optional
        // separators.
        (r"\+?\d[\d\s().-]{7,}\d", "[redacted-phone]"),
        (r"@[A-Za-z0-9_]{4,32}\b", "[redacted-handle]"),
        // 13-19 digit card-like runs with optional spaces or dashes.
        (
            r"\b\d{4}[ -]?\d{4}[ -]?\d{4}[ -]?\d{1,7}\b",
            "[redacted-card]",
        ),
    ];
    raw.iter()
        .map(|(pattern, replacement)| Rule {
            regex: Regex::new(pattern).expect("redaction pattern must compile"),
            replacement,
        })
        .collect()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redacted {
    pub text: String,
    pub changed: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum RedactError {
    #[error("text of {len} bytes exceeds the redaction limit")]
    TooLong { len: usize },
}

/// Scrub one text. Card runs are replaced before the generic phone rule so a
/// card number is never half-eaten as a phone number.
pub fn redact(text: &str) -> Result<Redacted, RedactError> {
    if text.len() > MAX_REDACTION_LEN {
        return Err(RedactError::TooLong { len: text.len() });
    }

    let mut out = text.to_string();
    let mut changed = false;

    // Cards first, then email, phone, handle.
    let order = [3usize, 0, 1, 2];
    for idx in order {
        let rule = &RULES[idx];
        if rule.regex.is_match(&out) {
            out = rule.regex.replace_all(&out, rule.replacement).into_owned();
            changed = true;
        }
    }

    Ok(Redacted { text: out, changed })
}

/// Outcome of redacting an input/reply pair: the texts to persist plus the
/// combined status for the log row.
#[derive(Debug, Clone)]
pub struct RedactedPair {
    pub input: String,
    pub reply: String,
    pub status: RedactionStatus,
}

/// Redact both sides of an exchange. A failure on either side withholds that
/// side's content and marks the whole row failed.
pub fn redact_pair(input: &str, reply: &str) -> RedactedPair {
    let (input_text, input_status) = redact_one(input);
    let (reply_text, reply_status) = redact_one(reply);

    RedactedPair {
        input: input_text,
        reply: reply_text,
        status: input_status.combine(reply_status),
    }
}

fn redact_one(text: &str) -> (String, RedactionStatus) {
    match redact(text) {
        Ok(redacted) => {
            let status = if redacted.changed {
                RedactionStatus::Redacted
            } else {
                RedactionStatus::Skipped
            };
            (redacted.text, status)
        }
        Err(err) => {
            tracing::warn!(error = %err, "redaction failed; withholding content from the log");
            (REDACTION_PLACEHOLDER.to_string(), RedactionStatus::Failed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_is_skipped() {
        let r = redact("how do streaks work?").unwrap();
        assert!(!r.changed);
        assert_eq!(r.text, "how do streaks work?");
    }

    #[test]
    fn emails_are_redacted() {
        let r = redact("write to aziza@fokus.uz please").unwrap();
        assert!(r.changed);
        assert_eq!(r.text, "write to [redacted-email] please");
    }

    #[test]
    fn phones_are_redacted() {
        let r = redact("call me at +998 90 123 45 67").unwrap();
        assert!(r.changed);
        assert!(r.text.contains("[redacted-phone]"));
        assert!(!r.text.contains("998"));
    }

    #[test]
    fn telegram_handles_are_redacted() {
        let r = redact("ping me at @aziza_fokus").unwrap();
        assert!(r.changed);
        assert_eq!(r.text, "ping me at [redacted-handle]");
    }

    #[test]
    fn card_numbers_are_redacted_before_phone_rule() {
        let r = redact("card 8600 1234 5678 9012").unwrap();
        assert!(r.changed);
        assert!(r.text.contains("[redacted-card]"));
        assert!(!r.text.contains("[redacted-phone]"));
    }

    #[test]
    fn oversized_text_is_an_error() {
        let big = "a".repeat(MAX_REDACTION_LEN + 1);
        assert!(matches!(redact(&big), Err(RedactError::TooLong { .. })));
    }

    #[test]
    fn pair_combines_statuses() {
        let pair = redact_pair("my email is a@b.cc", "sure thing");
        assert_eq!(pair.status, RedactionStatus::Redacted);
        assert_eq!(pair.reply, "sure thing");

        let clean = redact_pair("hello", "world");
        assert_eq!(clean.status, RedactionStatus::Skipped);
    }

    #[test]
    fn pair_failure_withholds_content() {
        let big = "a".repeat(MAX_REDACTION_LEN + 1);
        let pair = redact_pair(&big, "short reply");
        assert_eq!(pair.status, RedactionStatus::Failed);
        assert_eq!(pair.input, REDACTION_PLACEHOLDER);
        assert_eq!(pair.reply, "short reply");
    }
}
