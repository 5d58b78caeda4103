//! The streaming response pipeline and the state machine that drives it.

pub mod messages;
pub mod stream;
pub mod turn;

pub use messages::{LlmToken, TokenStream};
pub use stream::{SentenceAssembler, StreamEnd};
pub use turn::DialogueMachine;
