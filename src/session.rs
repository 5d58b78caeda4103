//! Conversation memory: transcript turns, session state, and persistence.
//!
//! A [`Session`] splits memory in two: `permanent` holds the system prompt
//! plus durable history restored at startup, `session` holds only the turns
//! of the current run. The serialized file (`history.json`) flattens both,
//! keeping the system prompt and the most recent turns.

use crate::error::{AgentError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Speaker role of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One immutable entry in the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// In-memory conversation state for one process lifetime.
///
/// Invariant: `permanent[0]` is always the system prompt turn; it is never
/// removed or reordered.
#[derive(Debug, Clone)]
pub struct Session {
    permanent: Vec<ConversationTurn>,
    session: Vec<ConversationTurn>,
}

impl Session {
    /// Fresh session containing only the system prompt.
    #[must_use]
    pub fn new(system_prompt: &str) -> Self {
        Self {
            permanent: vec![ConversationTurn::system(system_prompt)],
            session: Vec::new(),
        }
    }

    /// Rebuild a session from persisted turns.
    ///
    /// If the stored history does not start with a system turn (missing or
    /// corrupt file), the given prompt is prepended so the invariant holds.
    #[must_use]
    pub fn from_history(turns: Vec<ConversationTurn>, system_prompt: &str) -> Self {
        let mut permanent = turns;
        if permanent.first().is_none_or(|t| t.role != Role::System) {
            permanent.insert(0, ConversationTurn::system(system_prompt));
        }
        Self {
            permanent,
            session: Vec::new(),
        }
    }

    /// Durable turns (system prompt first).
    #[must_use]
    pub fn permanent(&self) -> &[ConversationTurn] {
        &self.permanent
    }

    /// Turns from this run only.
    #[must_use]
    pub fn session(&self) -> &[ConversationTurn] {
        &self.session
    }

    /// Message list for the next inference call: permanent + session + the
    /// pending user turn.
    #[must_use]
    pub fn messages_with(&self, user_text: &str) -> Vec<ConversationTurn> {
        let mut messages =
            Vec::with_capacity(self.permanent.len() + self.session.len() + 1);
        messages.extend_from_slice(&self.permanent);
        messages.extend_from_slice(&self.session);
        messages.push(ConversationTurn::user(user_text));
        messages
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.session.push(ConversationTurn::user(text));
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.session.push(ConversationTurn::assistant(text));
    }

    /// Wipe session memory and reset permanent memory to a bare system prompt.
    pub fn reset(&mut self, system_prompt: &str) {
        self.session.clear();
        self.permanent = vec![ConversationTurn::system(system_prompt)];
    }
}

/// JSON-file persistence for conversation history.
///
/// The on-disk shape is a flat array of `{role, content}` objects: the
/// system prompt at index 0 followed by the most recent turns.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
    keep_turns: usize,
}

impl HistoryStore {
    #[must_use]
    pub fn new(root_dir: &Path, keep_turns: usize) -> Self {
        Self {
            path: root_dir.join("history.json"),
            keep_turns,
        }
    }

    /// Load persisted history into a fresh [`Session`].
    ///
    /// A missing or unreadable file yields a bare session rather than an
    /// error: losing history must never prevent startup.
    #[must_use]
    pub fn load(&self, system_prompt: &str) -> Session {
        if !self.path.exists() {
            return Session::new(system_prompt);
        }
        match std::fs::read_to_string(&self.path)
            .map_err(AgentError::from)
            .and_then(|body| {
                serde_json::from_str::<Vec<ConversationTurn>>(&body)
                    .map_err(|e| AgentError::History(e.to_string()))
            }) {
            Ok(turns) => Session::from_history(turns, system_prompt),
            Err(e) => {
                warn!("failed to load history, starting fresh: {e}");
                Session::new(system_prompt)
            }
        }
    }

    /// Persist the session: system prompt plus the last `keep_turns`
    /// non-system turns across permanent and session memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the write fails.
    pub fn save(&self, session: &Session) -> Result<()> {
        let Some(system) = session.permanent().first() else {
            return Ok(());
        };

        let mut recent: Vec<&ConversationTurn> = session.permanent()[1..]
            .iter()
            .chain(session.session().iter())
            .collect();
        if recent.len() > self.keep_turns {
            recent.drain(..recent.len() - self.keep_turns);
        }

        let mut out = Vec::with_capacity(recent.len() + 1);
        out.push(system.clone());
        out.extend(recent.into_iter().cloned());

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_string_pretty(&out)
            .map_err(|e| AgentError::History(e.to_string()))?;
        std::fs::write(&self.path, body)?;
        Ok(())
    }
}
