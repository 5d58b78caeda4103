//! Collaborator contracts consumed by the dialogue core.
//!
//! Speech recognition, synthesis, model inference, search, camera capture,
//! and sound cues are all external engines behind narrow async traits. The
//! adapter layer that bridges platform callbacks into these calls lives
//! outside this crate; the core only ever awaits the contract below.

use crate::config::LlmConfig;
use crate::error::Result;
use crate::pipeline::messages::TokenStream;
use crate::session::ConversationTurn;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of a failed recognition attempt.
///
/// "No speech heard" is not an error; `listen` returns `Ok(None)` for that.
/// The variants here drive the wake listener's back-off policy.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ListenError {
    /// The recognition service is busy (e.g. another client holds it).
    #[error("recognition service busy")]
    Busy,
    /// The recognition service rejected this client.
    #[error("recognition client rejected")]
    Rejected,
    /// Any other engine failure.
    #[error("recognition failed: {0}")]
    Engine(String),
}

/// Speech-to-text engine.
///
/// Implementations must tolerate being re-invoked after `stop_listening`
/// and may recreate their underlying platform session between calls.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Listen for one utterance, resolving with the transcript or `None`
    /// when nothing was heard before `timeout`.
    async fn listen(&self, timeout: Duration) -> std::result::Result<Option<String>, ListenError>;

    /// Abort the active recognition attempt, releasing the microphone.
    fn stop_listening(&self);
}

/// Text-to-speech engine.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Speak `text`, resolving only once the utterance has audibly
    /// completed (not an estimated duration).
    async fn speak(&self, text: &str) -> Result<()>;

    /// Cut off the current utterance immediately.
    fn stop(&self);
}

/// Language model engine.
///
/// Messages follow the `{role, content}` transcript shape. Adapters that
/// support image attachments expose them as additional user-turn content;
/// the core itself never sends one.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Streaming completion: tokens arrive on the returned channel, which
    /// closes at end of stream. A mid-stream failure is delivered in-band
    /// as an `Err` item.
    async fn chat_stream(
        &self,
        messages: &[ConversationTurn],
        params: &LlmConfig,
    ) -> Result<TokenStream>;

    /// Single non-streaming completion.
    async fn chat(&self, messages: &[ConversationTurn], params: &LlmConfig) -> Result<String>;
}

/// One web search result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub body: String,
}

/// Web search engine (1-result contract).
#[async_trait]
pub trait WebSearch: Send + Sync {
    /// News-specific search.
    async fn news(&self, query: &str) -> Result<Option<SearchHit>>;

    /// General text search.
    async fn text(&self, query: &str) -> Result<Option<SearchHit>>;
}

/// Camera capture engine.
#[async_trait]
pub trait Camera: Send + Sync {
    /// Capture one image, resolving with the saved file path or `None`
    /// when the capture produced nothing.
    async fn capture_image(&self) -> Result<Option<PathBuf>>;
}

/// Non-speech audio cue categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundCue {
    Greeting,
    Ack,
    Thinking,
    Error,
}

/// Fire-and-forget player for short feedback sounds.
pub trait SoundPlayer: Send + Sync {
    fn play(&self, cue: SoundCue);
}

/// The set of collaborator engines, each independently optional.
///
/// A failed engine init leaves its slot `None`; the state machine degrades
/// (spoken fallbacks, skipped features) rather than refusing to run.
#[derive(Clone, Default)]
pub struct Engines {
    pub recognizer: Option<Arc<dyn SpeechRecognizer>>,
    pub synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    pub model: Option<Arc<dyn LanguageModel>>,
    pub camera: Option<Arc<dyn Camera>>,
    pub search: Option<Arc<dyn WebSearch>>,
    pub sounds: Option<Arc<dyn SoundPlayer>>,
}

impl Engines {
    /// Play a sound cue if a player is available.
    pub fn cue(&self, cue: SoundCue) {
        if let Some(sounds) = &self.sounds {
            sounds.play(cue);
        }
    }
}

impl std::fmt::Debug for Engines {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engines")
            .field("recognizer", &self.recognizer.is_some())
            .field("synthesizer", &self.synthesizer.is_some())
            .field("model", &self.model.is_some())
            .field("camera", &self.camera.is_some())
            .field("search", &self.search.is_some())
            .field("sounds", &self.sounds.is_some())
            .finish()
    }
}
