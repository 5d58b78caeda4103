//! Ordered speech output: a sentence queue drained by a dedicated worker.
//!
//! Sentences are enqueued as the model streams them and spoken strictly in
//! arrival order, one at a time. An interrupt clears the queue in O(1) and
//! cuts the in-flight utterance through the synthesizer's `stop`.

use crate::engines::SpeechSynthesizer;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Fallback per-utterance delay when no synthesizer is available, so
/// pacing stays roughly realistic in degraded mode.
const SILENT_UTTERANCE: Duration = Duration::from_millis(500);

/// Idle-poll fallback while waiting for playback to finish.
const IDLE_POLL: Duration = Duration::from_millis(50);

/// FIFO queue of sentences awaiting playback, shared between the streaming
/// stage (producer) and the speech worker (consumer).
#[derive(Default)]
pub struct SpeechQueue {
    pending: Mutex<VecDeque<String>>,
    /// True from the moment an utterance is popped until it has audibly
    /// finished. Pending-empty alone does not mean silence.
    speaking: AtomicBool,
    items: Notify,
    drained: Notify,
}

impl SpeechQueue {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Append a sentence for playback.
    pub fn enqueue(&self, text: impl Into<String>) {
        let text = text.into();
        if text.trim().is_empty() {
            return;
        }
        if let Ok(mut pending) = self.pending.lock() {
            pending.push_back(text);
        }
        self.items.notify_one();
    }

    /// Drop every queued sentence. The utterance already in flight is not
    /// affected; pair this with `SpeechSynthesizer::stop` to silence it.
    pub fn clear(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
        self.drained.notify_waiters();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::Acquire)
    }

    /// True when nothing is queued and nothing is being spoken.
    ///
    /// Emptiness is read before the speaking flag. The worker raises the
    /// flag before it releases the queue lock, so this order can never
    /// observe the gap between popping the last sentence and starting its
    /// playback.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.is_empty() && !self.is_speaking()
    }

    /// Pop the next sentence, marking playback active before the lock is
    /// released so `is_idle` never observes a popped-but-unspoken gap.
    fn pop_for_playback(&self) -> Option<String> {
        let mut pending = self.pending.lock().ok()?;
        let text = pending.pop_front()?;
        self.speaking.store(true, Ordering::Release);
        Some(text)
    }

    /// Mark the in-flight utterance finished.
    fn finish_playback(&self) {
        self.speaking.store(false, Ordering::Release);
        if self.is_empty() {
            self.drained.notify_waiters();
        }
    }

    /// Wait until the queue has fully drained and playback is silent, or
    /// until `interrupt` is raised.
    pub async fn wait_until_idle(&self, interrupt: &AtomicBool) {
        loop {
            if self.is_idle() || interrupt.load(Ordering::Acquire) {
                return;
            }
            tokio::select! {
                () = self.drained.notified() => {}
                () = tokio::time::sleep(IDLE_POLL) => {}
            }
        }
    }
}

/// Drain the queue until cancelled, speaking one sentence at a time.
///
/// With no synthesizer available each sentence is consumed after a short
/// silent delay instead, keeping the turn flow alive in degraded mode.
pub async fn run_speech_worker(
    queue: Arc<SpeechQueue>,
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    cancel: CancellationToken,
) {
    debug!(has_synthesizer = synthesizer.is_some(), "speech worker started");
    loop {
        while let Some(text) = queue.pop_for_playback() {
            match &synthesizer {
                Some(synth) => {
                    if let Err(e) = synth.speak(&text).await {
                        warn!("speech playback failed: {e}");
                    }
                }
                None => tokio::time::sleep(SILENT_UTTERANCE).await,
            }
            queue.finish_playback();
            if cancel.is_cancelled() {
                debug!("speech worker stopped");
                return;
            }
        }
        tokio::select! {
            () = cancel.cancelled() => {
                debug!("speech worker stopped");
                return;
            }
            () = queue.items.notified() => {}
        }
    }
}
