//! Bracket-tag records: `[STATUS] Searching...`
//!
//! Older backends wrote untyped records whose payload starts with an
//! upper-case tag. Any tag is accepted; tags outside the known vocabulary
//! end up as status narration.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\[([A-Z][A-Z0-9_]*)\](.*)$").expect("valid legacy tag pattern")
});

/// A `[TAG] payload` record
#[derive(Debug, Clone, PartialEq)]
pub struct Tagged {
    /// Lower-cased tag
    pub tag: String,
    pub payload: Value,
    /// Trimmed text after the tag
    pub text: String,
}

/// Split a tagged record into its tag and payload
pub fn parse_tagged(raw: &str) -> Option<Tagged> {
    let captures = TAG_PATTERN.captures(raw.trim_start())?;
    let tag = captures.get(1)?.as_str().to_ascii_lowercase();
    let text = captures.get(2).map_or("", |m| m.as_str()).trim().to_string();

    let payload = if text.is_empty() {
        Value::Null
    } else if text.starts_with('{') || text.starts_with('[') {
        serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text.clone()))
    } else {
        Value::String(text.clone())
    };

    Some(Tagged { tag, payload, text })
}
