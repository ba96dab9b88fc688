//! Canonical sender identity from raw `From` headers
//!
//! Extraction is a best-effort heuristic, not RFC 5322 parsing. It favours
//! recall over provider-formatted headers: an address inside `<...>` wins,
//! otherwise the first email-shaped substring, otherwise nothing.

use once_cell::sync::Lazy;
use regex::Regex;

/// Email-shaped address enclosed in angle brackets, optional padding inside
static ANGLE_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<\s*([A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,})\s*>")
        .expect("angle address pattern is valid")
});

/// Bare email-shaped substring
static BARE_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}").expect("bare address pattern is valid")
});

/// Unicode whitespace plus the ASCII separators `\x1c`..=`\x1f`
fn is_header_space(c: char) -> bool {
    c.is_whitespace() || ('\u{1c}'..='\u{1f}').contains(&c)
}

/// Collapse every whitespace run (newlines and field separators included)
/// to one space and trim
pub fn normalize_header(value: &str) -> String {
    value
        .split(is_header_space)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Derive the canonical (lowercased) sender email from a `From` header.
///
/// Returns an empty string when no address can be determined; this is the
/// only failure signal and callers decide whether to drop such records.
///
/// ```
/// use gmail_sender_report::identity::extract_canonical_email;
///
/// assert_eq!(
///     extract_canonical_email("Jane Doe <Jane.DOE@Example.COM>, reply to spam@bad.com"),
///     "jane.doe@example.com"
/// );
/// assert_eq!(extract_canonical_email("contact sales@Firm.io for info"), "sales@firm.io");
/// assert_eq!(extract_canonical_email("no address here"), "");
/// ```
pub fn extract_canonical_email(from_header: &str) -> String {
    if from_header.is_empty() {
        return String::new();
    }

    let normalized = normalize_header(from_header);

    if let Some(address) = ANGLE_ADDRESS
        .captures(&normalized)
        .and_then(|caps| caps.get(1))
    {
        return address.as_str().to_lowercase();
    }

    BARE_ADDRESS
        .find(&normalized)
        .map(|m| m.as_str().to_lowercase())
        .unwrap_or_default()
}
