//! The dialogue state machine: one turn from trigger to spoken response.
//!
//! Owns the conversation session, the speech queue, and the interrupt flag,
//! and drives every state transition. Engines are swappable collaborators;
//! a missing one degrades the matching feature with a spoken fallback
//! instead of taking the machine down.

use crate::actions::{ActionResult, ActionRouter, extract_action};
use crate::arbiter::{ArbiterClient, ArbiterMessage, arbiter_channel};
use crate::config::AgentConfig;
use crate::engines::{Engines, SoundCue};
use crate::intent::detect_intent;
use crate::pipeline::stream::{SentenceAssembler, StreamEnd};
use crate::runtime::RuntimeEvent;
use crate::session::{ConversationTurn, HistoryStore, Session};
use crate::speech::{SpeechQueue, run_speech_worker};
use crate::state::{BotState, StateHandle};
use crate::wakeword::WakeListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Spoken when a turn needs the model and none is loaded.
const MODEL_MISSING: &str = "Sorry, the language model isn't loaded yet. \
    Please check that a model file is available and try again.";

/// Spoken when the model emitted an action the parser could not decode.
const ACTION_UNPARSEABLE: &str = "I'm not sure what to do with that.";

/// Interval between thinking-cue repeats while a response is pending.
const THINKING_CUE_PERIOD: Duration = Duration::from_millis(1500);

/// The conversational core. Construct with [`DialogueMachine::new`], wire
/// background tasks with [`DialogueMachine::start`], then feed it triggers.
pub struct DialogueMachine {
    config: AgentConfig,
    engines: Engines,
    state: StateHandle,
    session: Mutex<Session>,
    history: HistoryStore,
    queue: Arc<SpeechQueue>,
    router: ActionRouter,
    arbiter: ArbiterClient,
    wake_cmd_rx: Mutex<Option<mpsc::Receiver<ArbiterMessage>>>,
    interrupt: Arc<AtomicBool>,
    thinking_cue: Arc<AtomicBool>,
    events: broadcast::Sender<RuntimeEvent>,
    cancel: CancellationToken,
}

impl DialogueMachine {
    /// Build the machine, loading persisted conversation history.
    #[must_use]
    pub fn new(config: AgentConfig, engines: Engines) -> Arc<Self> {
        let history = HistoryStore::new(&config.history.root_dir, config.history.keep_turns);
        let session = history.load(&config.system_prompt());
        let router = ActionRouter::new(engines.search.clone());
        let grace = Duration::from_millis(config.wake.pause_grace_ms);
        let (arbiter, cmd_rx) = arbiter_channel(grace);
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            config,
            engines,
            state: StateHandle::new(),
            session: Mutex::new(session),
            history,
            queue: SpeechQueue::new(),
            router,
            arbiter,
            wake_cmd_rx: Mutex::new(Some(cmd_rx)),
            interrupt: Arc::new(AtomicBool::new(false)),
            thinking_cue: Arc::new(AtomicBool::new(false)),
            events,
            cancel: CancellationToken::new(),
        })
    }

    /// Subscribe to runtime events (state changes, transcript, captures).
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.events.subscribe()
    }

    /// Current dialogue state.
    #[must_use]
    pub fn current_state(&self) -> BotState {
        self.state.get()
    }

    #[must_use]
    pub fn speech_queue(&self) -> &Arc<SpeechQueue> {
        &self.queue
    }

    /// Spawn the speech worker and, when a recognizer is available, the
    /// background wake listener plus its trigger bridge.
    ///
    /// Takes an owned handle; call as `machine.clone().start().await`.
    pub async fn start(self: Arc<Self>) {
        tokio::spawn(run_speech_worker(
            self.queue.clone(),
            self.engines.synthesizer.clone(),
            self.cancel.child_token(),
        ));

        let cmd_rx = self.wake_cmd_rx.lock().await.take();
        if let Some(cmd_rx) = cmd_rx
            && let Some(recognizer) = self.engines.recognizer.clone()
        {
            let (wake_tx, mut wake_rx) = mpsc::channel(4);
            let listener = WakeListener::new(
                recognizer,
                self.config.wake.clone(),
                cmd_rx,
                wake_tx,
                self.cancel.child_token(),
            );
            tokio::spawn(listener.run());

            let machine = Arc::clone(&self);
            let cancel = self.cancel.child_token();
            tokio::spawn(async move {
                loop {
                    let msg = tokio::select! {
                        () = cancel.cancelled() => break,
                        msg = wake_rx.recv() => msg,
                    };
                    match msg {
                        Some(ArbiterMessage::WakeDetected) => {
                            machine.emit(RuntimeEvent::WakeDetected);
                            machine.on_trigger().await;
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
            });
        }
    }

    /// Initial spin-up: announce readiness once the engines are wired.
    pub async fn warmup(&self) {
        self.set_state(BotState::Warmup, "Warming up...");
        if self.engines.model.is_none() {
            warn!("no language model loaded; running in degraded mode");
        }
        self.engines.cue(SoundCue::Greeting);
        self.set_state(BotState::Idle, "Ready!");
    }

    /// Barge-in: silence everything mid-response, O(1).
    ///
    /// Clears queued sentences and the in-flight utterance, raises the
    /// interrupt flag so streaming and waits unwind, and returns to idle.
    pub fn interrupt(&self) {
        info!("interrupt requested");
        self.interrupt.store(true, Ordering::Release);
        self.thinking_cue.store(false, Ordering::Release);
        self.queue.clear();
        if let Some(synth) = &self.engines.synthesizer {
            synth.stop();
        }
        self.set_state(BotState::Idle, "Interrupted.");
    }

    /// React to a wake phrase or push-to-talk press.
    ///
    /// While the agent is responding this is a barge-in back to idle; while
    /// listening it finalizes the recording early; while idle it starts
    /// listening; in any other state the trigger is dropped. The
    /// idle-to-listening edge is taken atomically so concurrent triggers
    /// cannot double-start a turn.
    pub async fn on_trigger(&self) {
        match self.state.get() {
            BotState::Speaking | BotState::Thinking => {
                self.interrupt();
                return;
            }
            BotState::Listening => {
                // Push-to-talk finalize: cut the recording short and let
                // the pending listen resolve with whatever it heard.
                info!("trigger while listening; stopping recognition");
                if let Some(recognizer) = &self.engines.recognizer {
                    recognizer.stop_listening();
                }
                return;
            }
            BotState::Idle => {}
            other => {
                info!(state = other.name(), "trigger ignored");
                return;
            }
        }
        if !self.state.begin(BotState::Idle, BotState::Listening) {
            return;
        }
        self.listen_and_respond().await;
    }

    /// Inject typed text as if it had been spoken. Accepted only while
    /// idle, so it cannot collide with an in-flight turn.
    pub async fn submit_text(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if !self.state.begin(BotState::Idle, BotState::Thinking) {
            info!("text input ignored outside idle");
            return;
        }
        self.emit(RuntimeEvent::TranscriptLine(format!("YOU: {text}")));
        self.chat_and_respond(text).await;
    }

    /// One foreground listen: take the microphone, capture an utterance,
    /// and hand it to the conversation path.
    async fn listen_and_respond(&self) {
        self.interrupt.store(false, Ordering::Release);
        self.set_state(BotState::Listening, "Listening...");

        // The guard is held until the whole turn has finished, not just the
        // recognition phase. Handing the microphone back any earlier lets
        // the wake listener hear the bot's own speech and self-wake.
        let _guard = self.arbiter.acquire().await;
        let timeout = Duration::from_secs(self.config.turn.listen_timeout_secs);
        let heard = match &self.engines.recognizer {
            Some(recognizer) => recognizer.listen(timeout).await,
            None => Ok(None),
        };

        match heard {
            Ok(Some(text)) if !text.trim().is_empty() => {
                let text = text.trim().to_owned();
                self.engines.cue(SoundCue::Ack);
                self.emit(RuntimeEvent::TranscriptLine(format!("YOU: {text}")));
                self.chat_and_respond(&text).await;
            }
            Ok(_) => self.set_state(BotState::Idle, "Didn't catch that."),
            Err(e) => {
                warn!("foreground recognition failed: {e}");
                self.set_state(BotState::Idle, "Didn't catch that.");
            }
        }
    }

    /// The full think-act-speak path for one user utterance.
    async fn chat_and_respond(&self, user_text: &str) {
        self.interrupt.store(false, Ordering::Release);

        let lower = user_text.to_lowercase();
        if lower.contains("forget everything") || lower.contains("reset memory") {
            self.reset_memory().await;
            self.speak_and_finish("Okay. Memory wiped.", None).await;
            return;
        }

        self.set_state(BotState::Thinking, "Thinking...");
        self.start_thinking_cue();

        if let Some(request) = detect_intent(user_text) {
            info!(action = %request.action, "intent shortcut");
            let result = self.router.execute(&request).await;
            self.handle_tool_result(result, user_text).await;
            return;
        }

        let Some(model) = self.engines.model.clone() else {
            self.speak_and_finish(MODEL_MISSING, None).await;
            return;
        };

        let messages = self.session.lock().await.messages_with(user_text);
        let mut stream = match model.chat_stream(&messages, &self.config.llm).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("model request failed: {e}");
                self.error_recover().await;
                return;
            }
        };

        let mut assembler = SentenceAssembler::new();
        let mut speaking = false;
        while let Some(item) = stream.recv().await {
            if self.interrupt.load(Ordering::Acquire) {
                return;
            }
            match item {
                Ok(token) => {
                    let was_action = assembler.in_action_mode();
                    let sentence = assembler.push_token(&token.text);
                    if assembler.in_action_mode() {
                        // Structured output is parsed, not shown or spoken.
                        if !was_action {
                            self.stop_thinking_cue();
                        }
                        continue;
                    }
                    self.emit(RuntimeEvent::TranscriptDelta(token.text.clone()));
                    if let Some(sentence) = sentence {
                        if !speaking {
                            speaking = true;
                            self.stop_thinking_cue();
                            self.set_state(BotState::Speaking, "Speaking...");
                        }
                        self.queue.enqueue(sentence);
                    }
                }
                Err(e) => {
                    error!("model stream failed: {e}");
                    self.queue.clear();
                    self.error_recover().await;
                    return;
                }
            }
        }
        if self.interrupt.load(Ordering::Acquire) {
            return;
        }

        match assembler.finish() {
            StreamEnd::Action { raw } => match extract_action(&raw) {
                Some(request) => {
                    let result = self.router.execute(&request).await;
                    self.handle_tool_result(result, user_text).await;
                }
                None => {
                    warn!("unparseable action output: {raw}");
                    self.speak_and_finish(ACTION_UNPARSEABLE, None).await;
                }
            },
            StreamEnd::Text { full, tail } => {
                if full.is_empty() {
                    self.speak_and_finish("I didn't come up with anything.", None)
                        .await;
                    return;
                }
                if let Some(tail) = tail {
                    if !speaking {
                        self.stop_thinking_cue();
                        self.set_state(BotState::Speaking, "Speaking...");
                    }
                    self.queue.enqueue(tail);
                }
                self.record_exchange(user_text, &full).await;
                self.emit(RuntimeEvent::TranscriptLine(format!("BOT: {full}")));
                self.stop_thinking_cue();
                self.queue.wait_until_idle(&self.interrupt).await;
                if !self.interrupt.load(Ordering::Acquire) {
                    self.set_state(BotState::Idle, "Ready!");
                }
            }
        }
    }

    /// Turn a tool result into speech (or a follow-up model call).
    async fn handle_tool_result(&self, result: ActionResult, user_text: &str) {
        match result {
            ActionResult::Raw(payload) => {
                let summary = self.summarize(&payload, user_text).await;
                self.speak_and_finish(&summary, Some(user_text)).await;
            }
            ActionResult::ImageCaptureTriggered => self.capture_image(user_text).await,
            ActionResult::ChatFallback(text) => {
                // The unknown action's value reads like conversation, so it
                // becomes the bot's response as-is. No second model call.
                info!("action fell back to chat");
                self.speak_and_finish(&text, Some(user_text)).await;
            }
            ActionResult::InvalidAction => {
                self.speak_and_finish("I am not sure how to do that.", Some(user_text))
                    .await;
            }
            ActionResult::SearchEmpty => {
                self.speak_and_finish(
                    "I searched, but I couldn't find any news about that.",
                    Some(user_text),
                )
                .await;
            }
            ActionResult::SearchError => {
                self.speak_and_finish("I cannot reach the internet right now.", Some(user_text))
                    .await;
            }
        }
    }

    /// Condense a raw tool payload into one speakable sentence. Falls back
    /// to the payload itself when no model is available or it fails.
    async fn summarize(&self, payload: &str, user_text: &str) -> String {
        let Some(model) = &self.engines.model else {
            return payload.to_owned();
        };
        self.set_state(BotState::Thinking, "Reading...");
        let messages = [
            ConversationTurn::system("Summarize this result in one short sentence."),
            ConversationTurn::user(format!("RESULT: {payload}\nUser Question: {user_text}")),
        ];
        match model.chat(&messages, &self.config.llm).await {
            Ok(summary) if !summary.trim().is_empty() => summary.trim().to_owned(),
            Ok(_) => payload.to_owned(),
            Err(e) => {
                warn!("summarization failed: {e}");
                payload.to_owned()
            }
        }
    }

    /// Run the camera and speak what happened.
    async fn capture_image(&self, user_text: &str) {
        self.set_state(BotState::Capturing, "Capturing...");
        let Some(camera) = &self.engines.camera else {
            self.speak_and_finish("Camera not available.", Some(user_text))
                .await;
            return;
        };
        match camera.capture_image().await {
            Ok(Some(path)) => {
                self.emit(RuntimeEvent::ImageCaptured(path));
                self.speak_and_finish(
                    "I captured an image, but I can't analyze it yet. \
                     Vision support is coming soon!",
                    Some(user_text),
                )
                .await;
            }
            Ok(None) => {
                self.speak_and_finish("I couldn't capture an image.", Some(user_text))
                    .await;
            }
            Err(e) => {
                warn!("camera capture failed: {e}");
                self.speak_and_finish("I couldn't capture an image.", Some(user_text))
                    .await;
            }
        }
    }

    /// Speak a complete response, record it when it answers a user turn,
    /// and return to idle once playback drains.
    async fn speak_and_finish(&self, text: &str, user_text: Option<&str>) {
        if let Some(user_text) = user_text {
            self.record_exchange(user_text, text).await;
        }
        self.emit(RuntimeEvent::TranscriptLine(format!("BOT: {text}")));
        self.stop_thinking_cue();
        self.set_state(BotState::Speaking, "Speaking...");
        self.queue.enqueue(text);
        self.queue.wait_until_idle(&self.interrupt).await;
        if !self.interrupt.load(Ordering::Acquire) {
            self.set_state(BotState::Idle, "Ready!");
        }
    }

    /// Enter the error state, hold it briefly, then recover to idle.
    async fn error_recover(&self) {
        self.stop_thinking_cue();
        self.queue.clear();
        self.engines.cue(SoundCue::Error);
        self.set_state(BotState::Error, "Brain Freeze!");
        let hold = Duration::from_secs(self.config.turn.error_recovery_secs);
        tokio::select! {
            () = self.cancel.cancelled() => return,
            () = tokio::time::sleep(hold) => {}
        }
        self.set_state(BotState::Idle, "Ready!");
    }

    /// Wipe everything but the system prompt, on disk too.
    async fn reset_memory(&self) {
        let mut session = self.session.lock().await;
        session.reset(&self.config.system_prompt());
        if let Err(e) = self.history.save(&session) {
            warn!("could not persist history reset: {e}");
        }
    }

    async fn record_exchange(&self, user_text: &str, assistant_text: &str) {
        let mut session = self.session.lock().await;
        session.push_user(user_text);
        session.push_assistant(assistant_text);
        if let Err(e) = self.history.save(&session) {
            warn!("could not persist history: {e}");
        }
    }

    /// Persist state and stop every background task.
    pub async fn shutdown(&self) {
        info!("dialogue machine shutting down");
        {
            let session = self.session.lock().await;
            if let Err(e) = self.history.save(&session) {
                warn!("could not persist history on shutdown: {e}");
            }
        }
        self.arbiter.stop_service().await;
        self.cancel.cancel();
    }

    fn start_thinking_cue(&self) {
        self.thinking_cue.store(true, Ordering::Release);
        if self.engines.sounds.is_none() {
            return;
        }
        let flag = Arc::clone(&self.thinking_cue);
        let engines = self.engines.clone();
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            while flag.load(Ordering::Acquire) && !cancel.is_cancelled() {
                engines.cue(SoundCue::Thinking);
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(THINKING_CUE_PERIOD) => {}
                }
            }
        });
    }

    fn stop_thinking_cue(&self) {
        self.thinking_cue.store(false, Ordering::Release);
    }

    fn set_state(&self, state: BotState, status: &str) {
        self.state.set(state, status);
        let _ = self.events.send(RuntimeEvent::State {
            state,
            status: status.to_owned(),
        });
    }

    fn emit(&self, event: RuntimeEvent) {
        let _ = self.events.send(event);
    }
}

impl std::fmt::Debug for DialogueMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialogueMachine")
            .field("state", &self.state.get())
            .field("engines", &self.engines)
            .finish_non_exhaustive()
    }
}
