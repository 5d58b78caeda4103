//! Turn-latency harness.
//!
//! Drives the dialogue machine with scripted engines (no audio hardware,
//! no model weights) and reports per-turn timings: trigger to first spoken
//! sentence, and trigger to idle. Useful for eyeballing pipeline overhead
//! and for exercising the full turn path from the command line.
//!
//! Run with: `cargo run --bin pocketbot-harness`

use anyhow::Result;
use async_trait::async_trait;
use pocketbot::config::{AgentConfig, HistoryConfig, LlmConfig};
use pocketbot::engines::{Engines, LanguageModel, SpeechSynthesizer};
use pocketbot::pipeline::messages::{LlmToken, TokenStream};
use pocketbot::pipeline::DialogueMachine;
use pocketbot::runtime::RuntimeEvent;
use pocketbot::session::ConversationTurn;
use pocketbot::state::BotState;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::info;

/// Simulated token cadence for a small on-device model.
const TOKEN_DELAY: Duration = Duration::from_millis(25);

/// Simulated playback speed, per character.
const SPEECH_DELAY_PER_CHAR: Duration = Duration::from_millis(2);

const SCRIPTED_RESPONSES: &[&str] = &[
    "Hi! I am ready to help. What do you need today?",
    "Rust is a systems language. It is fast and safe. I like it a lot!",
    r#"{"action": "get_time", "value": "now"}"#,
];

/// Replays canned responses token by token.
struct ScriptedModel {
    turn: AtomicUsize,
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn chat_stream(
        &self,
        _messages: &[ConversationTurn],
        _params: &LlmConfig,
    ) -> pocketbot::Result<TokenStream> {
        let index = self.turn.fetch_add(1, Ordering::Relaxed) % SCRIPTED_RESPONSES.len();
        let response = SCRIPTED_RESPONSES[index];
        let tokens: Vec<String> = response
            .split_inclusive(' ')
            .map(str::to_owned)
            .collect();
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            for token in tokens {
                tokio::time::sleep(TOKEN_DELAY).await;
                if tx.send(Ok(LlmToken { text: token })).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn chat(
        &self,
        _messages: &[ConversationTurn],
        _params: &LlmConfig,
    ) -> pocketbot::Result<String> {
        tokio::time::sleep(TOKEN_DELAY * 10).await;
        Ok("It is almost noon.".to_owned())
    }
}

/// Prints utterances instead of playing them, pacing by text length.
struct PrintingSynth;

#[async_trait]
impl SpeechSynthesizer for PrintingSynth {
    async fn speak(&self, text: &str) -> pocketbot::Result<()> {
        println!("  [speak] {text}");
        tokio::time::sleep(SPEECH_DELAY_PER_CHAR * text.len() as u32).await;
        Ok(())
    }

    fn stop(&self) {}
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let scratch = tempfile_dir()?;
    let mut config = AgentConfig::default();
    config.history = HistoryConfig {
        root_dir: scratch.clone(),
        keep_turns: 10,
    };

    let engines = Engines {
        model: Some(Arc::new(ScriptedModel {
            turn: AtomicUsize::new(0),
        })),
        synthesizer: Some(Arc::new(PrintingSynth)),
        ..Engines::default()
    };

    let machine = DialogueMachine::new(config, engines);
    machine.clone().start().await;
    machine.warmup().await;

    let prompts = [
        "hello there",
        "tell me about rust",
        "how late is it already",
    ];
    for prompt in prompts {
        println!("\nYOU: {prompt}");
        let mut events = machine.subscribe();
        let started = Instant::now();
        let driver = {
            let machine = Arc::clone(&machine);
            let prompt = prompt.to_owned();
            tokio::spawn(async move { machine.submit_text(&prompt).await })
        };

        let mut first_speech = None;
        while let Ok(event) = events.recv().await {
            match event {
                RuntimeEvent::State {
                    state: BotState::Speaking,
                    ..
                } if first_speech.is_none() => {
                    first_speech = Some(started.elapsed());
                }
                RuntimeEvent::State {
                    state: BotState::Idle,
                    ..
                } => break,
                _ => {}
            }
        }
        driver.await?;

        let total = started.elapsed();
        match first_speech {
            Some(first) => info!(
                "turn done: first speech {:.0?} / idle {:.0?}",
                first, total
            ),
            None => info!("turn done without speech in {:.0?}", total),
        }
    }

    machine.shutdown().await;
    let _ = std::fs::remove_dir_all(&scratch);
    Ok(())
}

/// Unique scratch directory so harness runs never touch real history.
fn tempfile_dir() -> Result<std::path::PathBuf> {
    let dir = std::env::temp_dir().join(format!("pocketbot-harness-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
