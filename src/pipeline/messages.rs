//! Message types passed between pipeline stages.

use crate::error::AgentError;
use tokio::sync::mpsc;

/// A single token emitted by the language model during streaming generation.
#[derive(Debug, Clone)]
pub struct LlmToken {
    /// The decoded text fragment.
    pub text: String,
}

/// Incremental token stream for one turn.
///
/// The channel closes at end of stream; a mid-stream engine failure arrives
/// in-band as an `Err` item and terminates the turn.
pub type TokenStream = mpsc::Receiver<std::result::Result<LlmToken, AgentError>>;
