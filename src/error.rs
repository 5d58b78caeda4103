//! Error types for the dialogue core.

/// Top-level error type for the voice agent.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Speech recognition error.
    #[error("recognizer error: {0}")]
    Recognizer(String),

    /// Speech synthesis error.
    #[error("synthesizer error: {0}")]
    Synthesizer(String),

    /// Language model inference error.
    #[error("model error: {0}")]
    Model(String),

    /// Camera capture error.
    #[error("camera error: {0}")]
    Camera(String),

    /// Web search error.
    #[error("search error: {0}")]
    Search(String),

    /// Conversation history load/save error.
    #[error("history error: {0}")]
    History(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Dialogue pipeline coordination error.
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, AgentError>;
