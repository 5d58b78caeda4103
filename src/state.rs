//! Bot state tracking for the dialogue state machine.
//!
//! Exactly one [`BotState`] is active at a time. All transitions go through a
//! [`StateHandle`], which serializes writes and broadcasts changes over a
//! `watch` channel so frontends can observe the current state without
//! participating in the pipeline.

use tokio::sync::watch;
use tracing::info;

/// The top-level dialogue state. Initial state is [`BotState::Warmup`];
/// there is no terminal state; the machine loops for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotState {
    /// Collaborator engines are still initializing.
    Warmup,
    /// Waiting for a manual trigger or wake signal.
    Idle,
    /// A foreground recognition attempt is active.
    Listening,
    /// The model (or a tool) is working on a response.
    Thinking,
    /// Synthesized speech is playing (or queued).
    Speaking,
    /// A camera capture is in flight.
    Capturing,
    /// A turn-level failure occurred; auto-recovers to Idle.
    Error,
}

impl BotState {
    /// Lowercase name used in logs and status events.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Warmup => "warmup",
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Thinking => "thinking",
            Self::Speaking => "speaking",
            Self::Capturing => "capturing",
            Self::Error => "error",
        }
    }
}

/// Shared handle to the current bot state.
///
/// Cloning is cheap; all clones observe and mutate the same state.
#[derive(Debug, Clone)]
pub struct StateHandle {
    tx: watch::Sender<BotState>,
}

impl StateHandle {
    /// Create a handle starting in [`BotState::Warmup`].
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(BotState::Warmup);
        Self { tx }
    }

    /// Current state.
    #[must_use]
    pub fn get(&self) -> BotState {
        *self.tx.borrow()
    }

    /// Unconditionally transition to `state`.
    pub fn set(&self, state: BotState, status: &str) {
        let previous = self.tx.send_replace(state);
        if previous != state || !status.is_empty() {
            info!(from = previous.name(), to = state.name(), "{status}");
        }
    }

    /// Transition to `to` only if the current state is `from`.
    ///
    /// The check-and-swap is atomic with respect to other handles, which is
    /// what lets concurrent trigger sources (UI tap, wake signal, timers)
    /// race for the Idle → Listening edge without double-starting a turn.
    pub fn begin(&self, from: BotState, to: BotState) -> bool {
        let mut changed = false;
        self.tx.send_if_modified(|current| {
            if *current == from {
                *current = to;
                changed = true;
                true
            } else {
                false
            }
        });
        if changed {
            info!(from = from.name(), to = to.name(), "state transition");
        }
        changed
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<BotState> {
        self.tx.subscribe()
    }
}

impl Default for StateHandle {
    fn default() -> Self {
        Self::new()
    }
}
