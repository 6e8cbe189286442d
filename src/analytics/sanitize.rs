//! Cleaning of raw request parameters before they reach the pipeline

use regex::Regex;
use std::sync::OnceLock;

use crate::analytics::models::{CleanParams, RawParams};

static TAG_PATTERN: OnceLock<Regex> = OnceLock::new();

fn tag_pattern() -> &'static Regex {
    // An unterminated tag swallows the rest of the value.
    TAG_PATTERN.get_or_init(|| Regex::new(r"(?s)<[^>]*(?:>|$)").expect("valid tag pattern"))
}

/// Strip markup and control characters from a single value
pub fn clean_value(value: &str) -> String {
    let stripped = tag_pattern().replace_all(value, "");
    stripped
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Clean every value and drop the keys that end up empty
///
/// Values are stored through bound parameters, so quotes survive unchanged.
pub fn sanitize(raw: &RawParams) -> CleanParams {
    raw.iter()
        .filter_map(|(key, value)| {
            let cleaned = clean_value(value.as_deref().unwrap_or_default());
            (!cleaned.is_empty()).then(|| (key.clone(), cleaned))
        })
        .collect()
}
