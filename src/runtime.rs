//! Runtime events emitted by the dialogue core for UI and observability.
//!
//! This is intentionally lightweight (no heavy payloads) so the pipeline
//! can emit events without blocking the turn path. Rendering (faces,
//! transcript view, camera overlay) is a frontend concern; the core only
//! broadcasts what happened.

use crate::state::BotState;
use std::path::PathBuf;

/// Events that describe what the agent is doing "right now".
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// State transition with a human-readable status line.
    State { state: BotState, status: String },
    /// A complete transcript line (user input or a full spoken response).
    TranscriptLine(String),
    /// Incremental assistant text while a response streams in.
    TranscriptDelta(String),
    /// The wake phrase was detected by the background listener.
    WakeDetected,
    /// A camera capture completed; the frontend may show the image.
    ImageCaptured(PathBuf),
}
