use std::sync::OnceLock;

use regex::Regex;

const SSN_MARKER: &str = "[SSN_REDACTED]";
const CC_MARKER: &str = "[CC_REDACTED]";
const EMAIL_MARKER: &str = "[EMAIL_REDACTED]";

fn ssn_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("ssn pattern"))
}

fn card_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // 16 digits in groups of four with optional single space/dash separators.
    PATTERN.get_or_init(|| {
        Regex::new(r"\b\d{4}[ -]?\d{4}[ -]?\d{4}[ -]?\d{4}\b").expect("card pattern")
    })
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("email pattern")
    })
}

/// Scrubs PII from free text before it is persisted or sent to the extractor.
///
/// SSNs are replaced before card numbers so a dash-separated SSN is never
/// half-consumed by the card rule.
pub fn redact(text: &str) -> String {
    let text = ssn_pattern().replace_all(text, SSN_MARKER);
    let text = card_pattern().replace_all(&text, CC_MARKER);
    email_pattern().replace_all(&text, EMAIL_MARKER).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_ssn() {
        assert_eq!(
            redact("my ssn is 123-45-6789 ok"),
            "my ssn is [SSN_REDACTED] ok"
        );
    }

    #[test]
    fn redacts_card_numbers_with_and_without_separators() {
        assert_eq!(redact("card 4111111111111111"), "card [CC_REDACTED]");
        assert_eq!(redact("card 4111 1111 1111 1111"), "card [CC_REDACTED]");
        assert_eq!(redact("card 4111-1111-1111-1111"), "card [CC_REDACTED]");
    }

    #[test]
    fn redacts_email_addresses() {
        assert_eq!(
            redact("reach me at alice@example.com today"),
            "reach me at [EMAIL_REDACTED] today"
        );
    }

    #[test]
    fn leaves_ordinary_text_alone() {
        let text = "follow up with Raj about the Q3 numbers next Tuesday";
        assert_eq!(redact(text), text);
    }

    #[test]
    fn ssn_is_not_consumed_by_card_rule() {
        assert_eq!(
            redact("123-45-6789 and 4111111111111111"),
            "[SSN_REDACTED] and [CC_REDACTED]"
        );
    }
}
