//! Manual "run now" requests.
//!
//! The channel holds at most one pending request. Firing while a request is
//! already pending is a no-op, so any number of triggers that arrive during a
//! pass collapse into exactly one follow-up pass.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Create a connected handle/receiver pair.
pub fn trigger_channel() -> (TriggerHandle, TriggerReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (TriggerHandle { tx }, TriggerReceiver { rx })
}

/// Result of firing a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireResult {
    /// A pass will run for this request.
    Queued,
    /// A request was already pending; this one was folded into it.
    Coalesced,
    /// The runner has stopped.
    Closed,
}

/// Cloneable sender side, handed to whatever produces manual triggers.
#[derive(Debug, Clone)]
pub struct TriggerHandle {
    tx: mpsc::Sender<()>,
}

impl TriggerHandle {
    pub fn fire(&self) -> FireResult {
        match self.tx.try_send(()) {
            Ok(()) => FireResult::Queued,
            Err(TrySendError::Full(())) => FireResult::Coalesced,
            Err(TrySendError::Closed(())) => FireResult::Closed,
        }
    }
}

/// Receiver side, owned by the pipeline runner.
#[derive(Debug)]
pub struct TriggerReceiver {
    rx: mpsc::Receiver<()>,
}

impl TriggerReceiver {
    /// Wait for the next trigger. Never resolves once every handle is gone.
    pub async fn recv(&mut self) {
        if self.rx.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }

    /// Consume a pending trigger without waiting.
    pub fn take_pending(&mut self) -> bool {
        self.rx.try_recv().is_ok()
    }
}
