//! Tool/action execution: alias resolution, validation, and dispatch.

use crate::engines::WebSearch;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

/// A structured tool request, produced by the intent detector or parsed
/// from the model's structured output.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ActionRequest {
    #[serde(default)]
    pub action: String,
    /// Some models emit `query` instead of `value`; accept both.
    #[serde(default, alias = "query")]
    pub value: Option<String>,
}

impl ActionRequest {
    #[must_use]
    pub fn new(action: impl Into<String>, value: Option<&str>) -> Self {
        Self {
            action: action.into(),
            value: value.map(str::to_owned),
        }
    }
}

/// Outcome of executing an [`ActionRequest`]. A closed set: `execute` never
/// raises, it always maps failures onto one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionResult {
    /// Unknown action whose value reads like conversation; treated as
    /// ordinary chat instead of failing hard.
    ChatFallback(String),
    /// Sentinel telling the state machine to invoke the camera collaborator.
    ImageCaptureTriggered,
    /// Unknown action with no usable value.
    InvalidAction,
    /// Both search passes yielded nothing.
    SearchEmpty,
    /// The search collaborator failed or is unreachable.
    SearchError,
    /// A result payload that still needs natural-language summarization.
    Raw(String),
}

/// The three actions the agent can actually perform.
const VALID_ACTIONS: [&str; 3] = ["get_time", "search_web", "capture_image"];

/// Maximum length of the search body snippet, in characters.
const SNIPPET_CHARS: usize = 300;

/// Normalize a raw action name through the fixed alias table. Unknown names
/// pass through unchanged.
#[must_use]
pub fn resolve_alias(raw: &str) -> &str {
    match raw {
        "google" | "browser" | "news" | "search_news" => "search_web",
        "look" | "see" => "capture_image",
        "check_time" => "get_time",
        other => other,
    }
}

/// Maps structured intents to tool results. Stateless apart from the search
/// collaborator handle; performs no I/O except through it.
#[derive(Clone)]
pub struct ActionRouter {
    search: Option<Arc<dyn WebSearch>>,
}

impl ActionRouter {
    #[must_use]
    pub fn new(search: Option<Arc<dyn WebSearch>>) -> Self {
        Self { search }
    }

    /// Execute an action request. Never returns an error: every failure
    /// mode is one of the [`ActionResult`] variants.
    pub async fn execute(&self, request: &ActionRequest) -> ActionResult {
        let raw = request.action.to_lowercase();
        let raw = raw.trim();
        let action = resolve_alias(raw);
        info!(raw, action, "action request");

        if !VALID_ACTIONS.contains(&action) {
            if let Some(value) = &request.value
                && value.split_whitespace().count() > 1
            {
                return ActionResult::ChatFallback(value.clone());
            }
            return ActionResult::InvalidAction;
        }

        match action {
            "get_time" => {
                let now = chrono::Local::now().format("%I:%M %p");
                ActionResult::Raw(format!("The current time is {now}."))
            }
            "capture_image" => ActionResult::ImageCaptureTriggered,
            _ => {
                let query = request.value.as_deref().unwrap_or("");
                self.search_web(query).await
            }
        }
    }

    /// News-first, text-fallback search with a 1-result limit.
    async fn search_web(&self, query: &str) -> ActionResult {
        info!(query, "searching web");
        let Some(search) = &self.search else {
            return ActionResult::SearchError;
        };

        let mut failed = false;
        let hit = match search.news(query).await {
            Ok(Some(hit)) => Some(hit),
            Ok(None) => None,
            Err(e) => {
                warn!("news search failed: {e}");
                failed = true;
                None
            }
        };
        let hit = match hit {
            Some(hit) => Some(hit),
            None => match search.text(query).await {
                Ok(found) => found,
                Err(e) => {
                    warn!("text search failed: {e}");
                    failed = true;
                    None
                }
            },
        };

        match hit {
            Some(hit) => {
                let snippet: String = hit.body.chars().take(SNIPPET_CHARS).collect();
                ActionResult::Raw(format!(
                    "SEARCH RESULTS for '{query}':\nTitle: {}\nSnippet: {snippet}",
                    hit.title
                ))
            }
            None if failed => ActionResult::SearchError,
            None => ActionResult::SearchEmpty,
        }
    }
}

/// Extract the model's structured action from raw streamed output.
///
/// Takes the first `{` through the last `}` (greedy) and parses it as an
/// [`ActionRequest`], tolerating chatter around the JSON object.
#[must_use]
pub fn extract_action(raw: &str) -> Option<ActionRequest> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&raw[start..=end]).ok()
}

impl std::fmt::Debug for ActionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRouter")
            .field("search", &self.search.is_some())
            .finish()
    }
}
