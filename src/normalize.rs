//! Canonical forms for the free-text identifiers used as join keys.
//!
//! Extraction upstream produces variants such as `"CAT3"`, `"CAT 3"`,
//! `"cat\u{a0}\u{a0}3"` or `"Cat-03"` for the same plan line. Every key that
//! crosses a boundary (ledger write, rollup lookup, plan lookup) goes through
//! [`normalize_id`] first, so raw strings are never compared.

use once_cell::sync::Lazy;
use regex::Regex;

static PREFIXED_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:([A-Za-z]+)[\s._\-]*)?(\d+(?:\.\d+)*)\.?$")
        .expect("identifier pattern is a valid regex")
});

/// Characters that render as nothing but break equality.
fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}' | '\u{00AD}'
    )
}

/// Trims, drops zero-width characters and collapses every whitespace run
/// (including non-breaking spaces) into a single ASCII space.
pub fn collapse_whitespace(raw: &str) -> String {
    raw.chars()
        .filter(|c| !is_invisible(*c))
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Canonicalizes a category or indicator identifier.
///
/// Recognized `PREFIX <sep> NUMBER[.NUMBER...]` forms become the upper-cased
/// prefix glued to the number with leading zeros removed per segment
/// (`"iku 01.2"` → `"IKU1.2"`). Anything else is returned trimmed with
/// whitespace collapsed. Never fails.
pub fn normalize_id(raw: &str) -> String {
    let collapsed = collapse_whitespace(raw);

    let Some(caps) = PREFIXED_ID.captures(&collapsed) else {
        return collapsed;
    };

    let prefix = caps
        .get(1)
        .map(|m| m.as_str().to_ascii_uppercase())
        .unwrap_or_default();
    let number = caps[2]
        .split('.')
        .map(strip_leading_zeros)
        .collect::<Vec<_>>()
        .join(".");

    format!("{prefix}{number}")
}

/// Lower-cased, whitespace-collapsed form used to match qualitative labels
/// against the text-condition vocabulary.
pub fn normalize_label(raw: &str) -> String {
    collapse_whitespace(raw).to_lowercase()
}

fn strip_leading_zeros(segment: &str) -> &str {
    let trimmed = segment.trim_start_matches('0');
    if trimmed.is_empty() {
        "0"
    } else {
        trimmed
    }
}
