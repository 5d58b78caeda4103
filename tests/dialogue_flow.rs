//! End-to-end turns through the dialogue machine with scripted engines.

#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use pocketbot::config::{AgentConfig, LlmConfig};
use pocketbot::engines::{Engines, LanguageModel, SearchHit, SpeechSynthesizer, WebSearch};
use pocketbot::pipeline::DialogueMachine;
use pocketbot::pipeline::messages::{LlmToken, TokenStream};
use pocketbot::runtime::RuntimeEvent;
use pocketbot::session::ConversationTurn;
use pocketbot::state::BotState;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Model that replays scripted token streams and chat replies.
struct ScriptedModel {
    streams: Mutex<VecDeque<Vec<String>>>,
    chat_replies: Mutex<VecDeque<String>>,
    stream_calls: AtomicUsize,
    chat_calls: AtomicUsize,
    token_delay: Duration,
}

impl ScriptedModel {
    fn new(streams: &[&[&str]], chat_replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            streams: Mutex::new(
                streams
                    .iter()
                    .map(|s| s.iter().map(|t| (*t).to_owned()).collect())
                    .collect(),
            ),
            chat_replies: Mutex::new(chat_replies.iter().map(|r| (*r).to_owned()).collect()),
            stream_calls: AtomicUsize::new(0),
            chat_calls: AtomicUsize::new(0),
            token_delay: Duration::from_millis(2),
        })
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn chat_stream(
        &self,
        _messages: &[ConversationTurn],
        _params: &LlmConfig,
    ) -> pocketbot::Result<TokenStream> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        let tokens = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        let delay = self.token_delay;
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            for token in tokens {
                tokio::time::sleep(delay).await;
                if token == "<ERR>" {
                    let _ = tx
                        .send(Err(pocketbot::AgentError::Model("scripted failure".into())))
                        .await;
                    return;
                }
                if tx.send(Ok(LlmToken { text: token })).await.is_err() {
                    return;
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
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .chat_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "scripted summary".to_owned()))
    }
}

/// Synthesizer that records what was spoken.
struct RecordingSynth {
    spoken: Mutex<Vec<String>>,
    per_utterance: Duration,
}

impl RecordingSynth {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            spoken: Mutex::new(Vec::new()),
            per_utterance: Duration::from_millis(10),
        })
    }

    fn slow() -> Arc<Self> {
        Arc::new(Self {
            spoken: Mutex::new(Vec::new()),
            per_utterance: Duration::from_millis(60),
        })
    }

    fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for RecordingSynth {
    async fn speak(&self, text: &str) -> pocketbot::Result<()> {
        tokio::time::sleep(self.per_utterance).await;
        self.spoken.lock().unwrap().push(text.to_owned());
        Ok(())
    }

    fn stop(&self) {}
}

/// Search engine with no results.
struct EmptySearch;

#[async_trait]
impl WebSearch for EmptySearch {
    async fn news(&self, _query: &str) -> pocketbot::Result<Option<SearchHit>> {
        Ok(None)
    }

    async fn text(&self, _query: &str) -> pocketbot::Result<Option<SearchHit>> {
        Ok(None)
    }
}

fn test_config(dir: &tempfile::TempDir) -> AgentConfig {
    let mut config = AgentConfig::default();
    config.history.root_dir = dir.path().to_path_buf();
    config.history.keep_turns = 10;
    config.turn.error_recovery_secs = 0;
    config.wake.pause_grace_ms = 1;
    config
}

async fn ready_machine(
    dir: &tempfile::TempDir,
    engines: Engines,
) -> Arc<DialogueMachine> {
    let machine = DialogueMachine::new(test_config(dir), engines);
    machine.clone().start().await;
    machine.warmup().await;
    machine
}

fn saved_history(dir: &tempfile::TempDir) -> Vec<serde_json::Value> {
    let body = std::fs::read_to_string(dir.path().join("history.json")).unwrap();
    serde_json::from_str(&body).unwrap()
}

#[tokio::test]
async fn streamed_text_is_spoken_sentence_by_sentence() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(&[&["Hi", "! ", "How", " are", " you", "?"]], &[]);
    let synth = RecordingSynth::new();
    let engines = Engines {
        model: Some(model.clone()),
        synthesizer: Some(synth.clone()),
        ..Engines::default()
    };
    let machine = ready_machine(&dir, engines).await;

    machine.submit_text("tell me a joke").await;

    assert_eq!(synth.spoken(), vec!["Hi!", "How are you?"]);
    assert_eq!(machine.current_state(), BotState::Idle);

    // The full response (not the chunks) lands in history.
    let history = saved_history(&dir);
    assert_eq!(history.len(), 3);
    assert_eq!(history[1]["content"], "tell me a joke");
    assert_eq!(history[2]["content"], "Hi! How are you?");
}

#[tokio::test]
async fn time_intent_bypasses_streaming_entirely() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(&[], &["It is almost noon."]);
    let synth = RecordingSynth::new();
    let engines = Engines {
        model: Some(model.clone()),
        synthesizer: Some(synth.clone()),
        ..Engines::default()
    };
    let machine = ready_machine(&dir, engines).await;

    machine.submit_text("what time is it").await;

    assert_eq!(model.stream_calls.load(Ordering::SeqCst), 0);
    assert_eq!(model.chat_calls.load(Ordering::SeqCst), 1);
    assert_eq!(synth.spoken(), vec!["It is almost noon."]);
    assert_eq!(machine.current_state(), BotState::Idle);
}

#[tokio::test]
async fn structured_output_is_never_spoken_aloud() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(
        &[&[r#"{""#, r#"action": "search_web", "#, r#""value": "moon landing news"}"#]],
        &[],
    );
    let synth = RecordingSynth::new();
    let engines = Engines {
        model: Some(model.clone()),
        synthesizer: Some(synth.clone()),
        search: Some(Arc::new(EmptySearch)),
        ..Engines::default()
    };
    let machine = ready_machine(&dir, engines).await;

    machine.submit_text("any news about the moon landing").await;

    let spoken = synth.spoken();
    assert_eq!(
        spoken,
        vec!["I searched, but I couldn't find any news about that."]
    );
    assert!(spoken.iter().all(|s| !s.contains('{')));
    assert_eq!(machine.current_state(), BotState::Idle);
}

#[tokio::test]
async fn reset_phrase_wipes_history_without_a_model_call() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(&[&["Hello friend", "."]], &[]);
    let synth = RecordingSynth::new();
    let engines = Engines {
        model: Some(model.clone()),
        synthesizer: Some(synth.clone()),
        ..Engines::default()
    };
    let machine = ready_machine(&dir, engines).await;

    machine.submit_text("say hello").await;
    assert_eq!(saved_history(&dir).len(), 3);

    machine.submit_text("please forget everything now").await;

    assert_eq!(model.stream_calls.load(Ordering::SeqCst), 1);
    let history = saved_history(&dir);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["role"], "system");
    assert_eq!(synth.spoken().last().unwrap(), "Okay. Memory wiped.");
}

#[tokio::test]
async fn interrupt_silences_and_returns_to_idle_immediately() {
    let dir = tempfile::tempdir().unwrap();
    // Plenty of sentences so playback is still going when we barge in.
    let tokens: Vec<&str> = std::iter::repeat_n("another sentence. ", 60).collect();
    let model = ScriptedModel::new(&[tokens.as_slice()], &[]);
    let synth = RecordingSynth::slow();
    let engines = Engines {
        model: Some(model.clone()),
        synthesizer: Some(synth.clone()),
        ..Engines::default()
    };
    let machine = ready_machine(&dir, engines).await;

    let mut events = machine.subscribe();
    let driver = {
        let machine = Arc::clone(&machine);
        tokio::spawn(async move { machine.submit_text("ramble for a while").await })
    };

    // Wait for playback to begin.
    loop {
        match events.recv().await.unwrap() {
            RuntimeEvent::State {
                state: BotState::Speaking,
                ..
            } => break,
            _ => {}
        }
    }
    tokio::time::sleep(Duration::from_millis(30)).await;

    machine.interrupt();
    assert_eq!(machine.current_state(), BotState::Idle);

    tokio::time::timeout(Duration::from_secs(5), driver)
        .await
        .unwrap()
        .unwrap();

    // Let the in-flight utterance finish, then confirm playback stays quiet.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let spoken_after = synth.spoken().len();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(synth.spoken().len(), spoken_after);
    assert!(machine.speech_queue().is_empty());

    // The interrupted response was dropped, not remembered.
    assert!(!dir.path().join("history.json").exists());
}

#[tokio::test]
async fn stream_failure_enters_error_then_recovers_to_idle() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(&[&["<ERR>"]], &[]);
    let synth = RecordingSynth::new();
    let engines = Engines {
        model: Some(model.clone()),
        synthesizer: Some(synth.clone()),
        ..Engines::default()
    };
    let machine = ready_machine(&dir, engines).await;

    let mut events = machine.subscribe();
    machine.submit_text("break please").await;

    let mut saw_error = false;
    while let Ok(event) = events.try_recv() {
        if let RuntimeEvent::State {
            state: BotState::Error,
            ..
        } = event
        {
            saw_error = true;
        }
    }
    assert!(saw_error);
    assert!(synth.spoken().is_empty());
    assert_eq!(machine.current_state(), BotState::Idle);
}

#[tokio::test]
async fn missing_model_gets_a_spoken_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let synth = RecordingSynth::new();
    let engines = Engines {
        synthesizer: Some(synth.clone()),
        ..Engines::default()
    };
    let machine = ready_machine(&dir, engines).await;

    machine.submit_text("anyone home").await;

    let spoken = synth.spoken();
    assert_eq!(spoken.len(), 1);
    assert!(spoken[0].contains("language model isn't loaded"));
    assert_eq!(machine.current_state(), BotState::Idle);
}

#[tokio::test]
async fn unknown_action_value_is_spoken_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(
        &[&[r#"{"action": "tell_joke", "value": "Why did the robot cross the road?"}"#]],
        &[],
    );
    let synth = RecordingSynth::new();
    let engines = Engines {
        model: Some(model.clone()),
        synthesizer: Some(synth.clone()),
        ..Engines::default()
    };
    let machine = ready_machine(&dir, engines).await;

    machine.submit_text("do something funny").await;

    // The fallback value becomes the response as-is; no second model call.
    assert_eq!(model.stream_calls.load(Ordering::SeqCst), 1);
    assert_eq!(model.chat_calls.load(Ordering::SeqCst), 0);
    assert_eq!(synth.spoken(), vec!["Why did the robot cross the road?"]);
    assert_eq!(machine.current_state(), BotState::Idle);

    let history = saved_history(&dir);
    assert_eq!(history[1]["role"], "user");
    assert_eq!(history[1]["content"], "do something funny");
    assert_eq!(history[2]["role"], "assistant");
    assert_eq!(history[2]["content"], "Why did the robot cross the road?");
}

/// Recognizer that always hears the same utterance.
struct ConstantRecognizer(&'static str);

#[async_trait]
impl pocketbot::engines::SpeechRecognizer for ConstantRecognizer {
    async fn listen(
        &self,
        _timeout: Duration,
    ) -> Result<Option<String>, pocketbot::engines::ListenError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(Some(self.0.to_owned()))
    }

    fn stop_listening(&self) {}
}

#[tokio::test]
async fn voice_trigger_runs_a_full_turn() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(&[], &["It is almost noon."]);
    let synth = RecordingSynth::new();
    let engines = Engines {
        model: Some(model.clone()),
        synthesizer: Some(synth.clone()),
        recognizer: Some(Arc::new(ConstantRecognizer("what time is it"))),
        ..Engines::default()
    };
    let machine = ready_machine(&dir, engines).await;

    let mut events = machine.subscribe();
    machine.on_trigger().await;

    assert_eq!(synth.spoken(), vec!["It is almost noon."]);
    assert_eq!(machine.current_state(), BotState::Idle);

    let mut saw_transcript = false;
    while let Ok(event) = events.try_recv() {
        if let RuntimeEvent::TranscriptLine(line) = event
            && line == "YOU: what time is it"
        {
            saw_transcript = true;
        }
    }
    assert!(saw_transcript);
    machine.shutdown().await;
}

#[tokio::test]
async fn text_input_is_ignored_outside_idle() {
    let dir = tempfile::tempdir().unwrap();
    let tokens: Vec<&str> = std::iter::repeat_n("still talking. ", 20).collect();
    let model = ScriptedModel::new(&[tokens.as_slice()], &[]);
    let synth = RecordingSynth::slow();
    let engines = Engines {
        model: Some(model.clone()),
        synthesizer: Some(synth.clone()),
        ..Engines::default()
    };
    let machine = ready_machine(&dir, engines).await;

    let driver = {
        let machine = Arc::clone(&machine);
        tokio::spawn(async move { machine.submit_text("first turn").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Mid-turn injection must be dropped, not queued.
    machine.submit_text("second turn").await;
    assert_eq!(model.stream_calls.load(Ordering::SeqCst), 1);

    machine.interrupt();
    tokio::time::timeout(Duration::from_secs(5), driver)
        .await
        .unwrap()
        .unwrap();
}

/// Recognizer whose first listen blocks (the wake listener's), whose second
/// returns an utterance (the foreground's), and which blocks thereafter.
struct CountingRecognizer {
    calls: AtomicUsize,
}

#[async_trait]
impl pocketbot::engines::SpeechRecognizer for CountingRecognizer {
    async fn listen(
        &self,
        _timeout: Duration,
    ) -> Result<Option<String>, pocketbot::engines::ListenError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call == 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(Some("tell me a joke".to_owned()))
        } else {
            std::future::pending().await
        }
    }

    fn stop_listening(&self) {}
}

#[tokio::test]
async fn microphone_is_held_until_the_turn_completes() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(&[&["One. ", "Two. ", "Three. "]], &[]);
    let synth = RecordingSynth::slow();
    let recognizer = Arc::new(CountingRecognizer {
        calls: AtomicUsize::new(0),
    });
    let engines = Engines {
        model: Some(model.clone()),
        synthesizer: Some(synth.clone()),
        recognizer: Some(recognizer.clone()),
        ..Engines::default()
    };
    let machine = ready_machine(&dir, engines).await;

    // Let the wake listener start its first (blocking) recognition attempt.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(recognizer.calls.load(Ordering::SeqCst), 1);

    let mut events = machine.subscribe();
    let driver = {
        let machine = Arc::clone(&machine);
        tokio::spawn(async move { machine.on_trigger().await })
    };
    loop {
        match events.recv().await.unwrap() {
            RuntimeEvent::State {
                state: BotState::Speaking,
                ..
            } => break,
            _ => {}
        }
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The foreground recognition was call two. While the response is still
    // playing, the wake listener must not be back on the microphone.
    assert_eq!(recognizer.calls.load(Ordering::SeqCst), 2);

    tokio::time::timeout(Duration::from_secs(5), driver)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(machine.current_state(), BotState::Idle);

    // With the turn over, the resumed wake listener takes the mic back.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(recognizer.calls.load(Ordering::SeqCst), 3);
    machine.shutdown().await;
}

/// Recognizer that holds its listen open until `stop_listening` is called.
struct HoldUntilStopped {
    released: tokio::sync::Notify,
    stops: AtomicUsize,
}

#[async_trait]
impl pocketbot::engines::SpeechRecognizer for HoldUntilStopped {
    async fn listen(
        &self,
        _timeout: Duration,
    ) -> Result<Option<String>, pocketbot::engines::ListenError> {
        self.released.notified().await;
        Ok(None)
    }

    fn stop_listening(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.released.notify_one();
    }
}

#[tokio::test]
async fn second_trigger_while_listening_finalizes_the_recording() {
    let dir = tempfile::tempdir().unwrap();
    let recognizer = Arc::new(HoldUntilStopped {
        released: tokio::sync::Notify::new(),
        stops: AtomicUsize::new(0),
    });
    let engines = Engines {
        recognizer: Some(recognizer.clone()),
        ..Engines::default()
    };
    // No background tasks: this turn never produces speech, and keeping the
    // wake listener out makes the stop count unambiguous.
    let machine = DialogueMachine::new(test_config(&dir), engines);
    machine.warmup().await;

    let driver = {
        let machine = Arc::clone(&machine);
        tokio::spawn(async move { machine.on_trigger().await })
    };
    while machine.current_state() != BotState::Listening {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Second press: the open-ended recording is cut short.
    machine.on_trigger().await;
    tokio::time::timeout(Duration::from_secs(2), driver)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(recognizer.stops.load(Ordering::SeqCst), 1);
    assert_eq!(machine.current_state(), BotState::Idle);
}
