//! Incremental segmentation of the model's token stream.
//!
//! Tokens are folded into sentences as they arrive so playback starts on
//! the first sentence boundary instead of waiting for the full response.
//! The assembler also watches every token for the structured-output
//! contract; the moment one looks like an action, all spoken output is
//! suppressed and the raw text is held back for parsing at end of stream.

/// Sentence terminators that trigger a flush.
const TERMINATORS: [char; 4] = ['.', '!', '?', '\n'];

/// How a completed stream should be handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// The model produced conversational text.
    Text {
        /// The full response, for the conversation history.
        full: String,
        /// Trailing text after the last sentence boundary, still unspoken.
        tail: Option<String>,
    },
    /// The model produced (or started to produce) a structured action.
    /// `raw` is the entire accumulated output, unsegmented.
    Action { raw: String },
}

/// Folds streamed tokens into speakable sentences.
#[derive(Debug, Default)]
pub struct SentenceAssembler {
    buffer: String,
    full: String,
    action_mode: bool,
}

impl SentenceAssembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True once a token has tripped the action heuristic; no further
    /// sentences will be produced this turn.
    #[must_use]
    pub fn in_action_mode(&self) -> bool {
        self.action_mode
    }

    /// Feed one token, returning a completed sentence when the token closes
    /// one.
    ///
    /// The heuristic is deliberately per-token and aggressive: `{"` or a
    /// case-insensitive `action:` anywhere in a single token switches the
    /// whole turn to action mode, even mid-sentence. A stray unspoken word
    /// is cheaper than reading JSON aloud; an opener split across two
    /// tokens does not trip it.
    pub fn push_token(&mut self, token: &str) -> Option<String> {
        self.full.push_str(token);
        if self.action_mode {
            return None;
        }
        if token.contains("{\"") || token.to_lowercase().contains("action:") {
            self.action_mode = true;
            self.buffer.clear();
            return None;
        }

        self.buffer.push_str(token);
        if token.contains(TERMINATORS) {
            let sentence = self.buffer.trim().to_owned();
            self.buffer.clear();
            // Punctuation-only fragments (e.g. a lone "...") are dropped.
            if sentence.chars().any(|c| c.is_ascii_alphanumeric()) {
                return Some(sentence);
            }
        }
        None
    }

    /// Consume the assembler at end of stream.
    #[must_use]
    pub fn finish(self) -> StreamEnd {
        if self.action_mode {
            return StreamEnd::Action { raw: self.full };
        }
        let tail = self.buffer.trim();
        let tail = (tail.chars().any(|c| c.is_ascii_alphanumeric())).then(|| tail.to_owned());
        StreamEnd::Text {
            full: self.full.trim().to_owned(),
            tail,
        }
    }
}
