//! Voice-driven conversational agent core.
//!
//! The crate turns a spoken (or typed) utterance into a spoken response:
//! a dialogue state machine arbitrates the microphone between a background
//! wake-phrase listener and the foreground turn, streams model tokens into
//! sentence-sized speech chunks, catches structured tool calls (time,
//! web search, camera), and keeps a persisted conversation history.
//!
//! Platform engines (speech recognition, synthesis, model inference,
//! search, camera, sound cues) plug in behind the traits in [`engines`];
//! the core never touches audio hardware itself.
//!
//! # Quick start
//!
//! ```no_run
//! use pocketbot::config::AgentConfig;
//! use pocketbot::engines::Engines;
//! use pocketbot::pipeline::DialogueMachine;
//!
//! # async fn run() {
//! let config = AgentConfig::default();
//! let engines = Engines::default(); // wire real adapters here
//! let machine = DialogueMachine::new(config, engines);
//! machine.clone().start().await;
//! machine.warmup().await;
//! machine.submit_text("hello there").await;
//! # }
//! ```

pub mod actions;
pub mod arbiter;
pub mod config;
pub mod engines;
pub mod error;
pub mod intent;
pub mod pipeline;
pub mod runtime;
pub mod session;
pub mod speech;
pub mod state;
pub mod wakeword;

pub use actions::{ActionRequest, ActionResult, ActionRouter};
pub use arbiter::{ArbiterClient, ArbiterMessage, MicGuard};
pub use config::AgentConfig;
pub use engines::Engines;
pub use error::{AgentError, Result};
pub use pipeline::DialogueMachine;
pub use runtime::RuntimeEvent;
pub use session::{ConversationTurn, HistoryStore, Role, Session};
pub use speech::SpeechQueue;
pub use state::BotState;
pub use wakeword::WakeListener;
