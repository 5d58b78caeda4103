//! Background wake-phrase listener.
//!
//! Runs as its own task, cycling short recognition attempts whenever the
//! foreground is not holding the microphone. Recognition failures are
//! expected steady-state noise (the platform service gets claimed by the
//! foreground, goes busy, or times out) and are absorbed with per-cause
//! back-offs instead of being escalated.

use crate::arbiter::ArbiterMessage;
use crate::config::WakeConfig;
use crate::engines::{ListenError, SpeechRecognizer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

enum Next {
    Stop,
    Command(Option<ArbiterMessage>),
    Heard(Result<Option<String>, ListenError>),
}

/// The wake-phrase listening loop.
pub struct WakeListener {
    recognizer: Arc<dyn SpeechRecognizer>,
    config: WakeConfig,
    cmd_rx: mpsc::Receiver<ArbiterMessage>,
    wake_tx: mpsc::Sender<ArbiterMessage>,
    cancel: CancellationToken,
    paused: bool,
}

impl WakeListener {
    #[must_use]
    pub fn new(
        recognizer: Arc<dyn SpeechRecognizer>,
        config: WakeConfig,
        cmd_rx: mpsc::Receiver<ArbiterMessage>,
        wake_tx: mpsc::Sender<ArbiterMessage>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            recognizer,
            config,
            cmd_rx,
            wake_tx,
            cancel,
            paused: false,
        }
    }

    /// Run until cancelled or told to stop.
    pub async fn run(mut self) {
        let phrase = self.config.phrase.to_lowercase();
        info!(phrase = %self.config.phrase, "wake listener started");

        loop {
            if self.paused {
                let next = tokio::select! {
                    () = self.cancel.cancelled() => Next::Stop,
                    cmd = self.cmd_rx.recv() => Next::Command(cmd),
                };
                if !self.handle(next) {
                    break;
                }
                continue;
            }

            let recognizer = Arc::clone(&self.recognizer);
            let timeout = Duration::from_secs(self.config.listen_timeout_secs);
            let next = tokio::select! {
                () = self.cancel.cancelled() => Next::Stop,
                cmd = self.cmd_rx.recv() => Next::Command(cmd),
                heard = recognizer.listen(timeout) => Next::Heard(heard),
            };

            match next {
                Next::Heard(Ok(Some(text))) => {
                    if text.to_lowercase().contains(&phrase) {
                        info!("wake phrase detected");
                        if self.wake_tx.send(ArbiterMessage::WakeDetected).await.is_err() {
                            break;
                        }
                    }
                }
                Next::Heard(Ok(None)) => {
                    // Timed out hearing nothing; go straight back around.
                }
                Next::Heard(Err(e)) => {
                    let backoff = match e {
                        ListenError::Rejected => {
                            Duration::from_millis(self.config.rejected_backoff_ms)
                        }
                        ListenError::Busy => Duration::from_millis(self.config.busy_backoff_ms),
                        ListenError::Engine(ref msg) => {
                            warn!("wake recognition failed: {msg}");
                            Duration::from_millis(self.config.retry_delay_ms)
                        }
                    };
                    debug!(?backoff, "wake listener backing off");
                    if !self.backoff(backoff).await {
                        break;
                    }
                }
                next => {
                    if !self.handle(next) {
                        break;
                    }
                }
            }
        }
        info!("wake listener stopped");
    }

    /// Apply a control message. Returns false when the loop should exit.
    fn handle(&mut self, next: Next) -> bool {
        match next {
            Next::Stop | Next::Command(None) | Next::Command(Some(ArbiterMessage::StopService)) => {
                false
            }
            Next::Command(Some(ArbiterMessage::PauseListening)) => {
                if !self.paused {
                    debug!("wake listener pausing");
                    self.paused = true;
                    self.recognizer.stop_listening();
                }
                true
            }
            Next::Command(Some(ArbiterMessage::ResumeListening)) => {
                if self.paused {
                    debug!("wake listener resuming");
                    self.paused = false;
                }
                true
            }
            // Wake notifications flow the other way; ignore echoes.
            Next::Command(Some(ArbiterMessage::WakeDetected)) | Next::Heard(_) => true,
        }
    }

    /// Sleep out a back-off while staying responsive to control messages.
    async fn backoff(&mut self, duration: Duration) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(duration) => true,
            cmd = self.cmd_rx.recv() => self.handle(Next::Command(cmd)),
        }
    }
}
