//! Textual intent detection, run before any model call.
//!
//! Small on-device models are unreliable at emitting the structured-output
//! contract, so obvious tool requests are caught straight from the user's
//! text. Matching order: time phrases, then camera phrases, then search
//! patterns. First match wins.

use crate::actions::ActionRequest;
use regex::Regex;
use std::sync::LazyLock;

const TIME_TRIGGERS: &[&str] = &[
    "what time",
    "what's the time",
    "current time",
    "tell me the time",
    "time is it",
    "what is the time",
];

const CAMERA_TRIGGERS: &[&str] = &[
    "take a photo",
    "take a picture",
    "take photo",
    "take picture",
    "capture image",
    "capture a photo",
    "what do you see",
    "look around",
];

static SEARCH_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?:search|look up|find|google)\s+(?:for\s+|about\s+|news\s+(?:about\s+)?)?(.+)",
        r"what(?:'s| is) (?:happening|the latest|the news)(?: about| on)?\s*(.+)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap_or_else(|e| unreachable!("invalid search pattern: {e}")))
    .collect()
});

/// Match user text against the known tool intents.
///
/// Returns `None` when nothing matches, in which case the text goes to the
/// model as ordinary conversation.
#[must_use]
pub fn detect_intent(text: &str) -> Option<ActionRequest> {
    let t = text.to_lowercase();
    let t = t.trim();

    if TIME_TRIGGERS.iter().any(|trigger| t.contains(trigger)) {
        return Some(ActionRequest::new("get_time", Some("now")));
    }

    if CAMERA_TRIGGERS.iter().any(|trigger| t.contains(trigger)) {
        return Some(ActionRequest::new("capture_image", Some("environment")));
    }

    for pattern in SEARCH_PATTERNS.iter() {
        if let Some(captures) = pattern.captures(t)
            && let Some(query) = captures.get(1)
        {
            let query = query.as_str().trim().trim_end_matches(['?', '.']);
            // Under 3 characters is too ambiguous to search for.
            if query.chars().count() > 2 {
                return Some(ActionRequest::new("search_web", Some(query)));
            }
        }
    }

    None
}
