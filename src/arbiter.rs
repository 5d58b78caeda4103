//! Microphone arbitration between the foreground turn loop and the
//! background wake listener.
//!
//! Only one of the two may hold the microphone. The foreground side
//! acquires it through [`ArbiterClient::acquire`], which pauses the wake
//! listener and waits a short grace period for the platform recognizer to
//! actually release the device; dropping the returned guard resumes the
//! listener. Every message is advisory, so a lost one degrades to a missed
//! wake-up rather than a deadlock.

use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Control-plane messages exchanged with the wake listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbiterMessage {
    /// Emitted by the listener when the wake phrase was heard.
    WakeDetected,
    /// Foreground wants the microphone; release it and go dormant.
    PauseListening,
    /// Foreground is done with the microphone.
    ResumeListening,
    /// Shut the listener down for good.
    StopService,
}

/// Build a connected client/receiver pair. The receiver is handed to the
/// wake listener as its command inbox.
#[must_use]
pub fn arbiter_channel(grace: Duration) -> (ArbiterClient, mpsc::Receiver<ArbiterMessage>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    (ArbiterClient { cmd_tx, grace }, cmd_rx)
}

/// Foreground handle to the microphone arbiter.
#[derive(Debug, Clone)]
pub struct ArbiterClient {
    cmd_tx: mpsc::Sender<ArbiterMessage>,
    grace: Duration,
}

impl ArbiterClient {
    /// Take the microphone: pause the wake listener, then wait out the
    /// hand-over grace period before the caller starts recognizing.
    pub async fn acquire(&self) -> MicGuard {
        if self.cmd_tx.send(ArbiterMessage::PauseListening).await.is_err() {
            debug!("wake listener gone; acquiring microphone uncontended");
        }
        tokio::time::sleep(self.grace).await;
        MicGuard {
            cmd_tx: self.cmd_tx.clone(),
        }
    }

    /// Ask the wake listener to exit its loop.
    pub async fn stop_service(&self) {
        let _ = self.cmd_tx.send(ArbiterMessage::StopService).await;
    }
}

/// Exclusive microphone hold. Dropping it hands the microphone back to the
/// wake listener.
#[derive(Debug)]
pub struct MicGuard {
    cmd_tx: mpsc::Sender<ArbiterMessage>,
}

impl Drop for MicGuard {
    fn drop(&mut self) {
        // Drop runs in sync context; a full inbox just means the listener
        // is already being told things, so losing the resume is tolerable.
        if let Err(e) = self.cmd_tx.try_send(ArbiterMessage::ResumeListening) {
            warn!("could not hand microphone back: {e}");
        }
    }
}
