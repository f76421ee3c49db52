//! Coordinator shutdown lifecycle.
//!
//! A coordinator shuts down in a fixed order: the sweep is drained first,
//! then cached managers are disconnected. Observers can follow progress
//! through a `watch` receiver.

use tokio::sync::watch;

/// Stages of a coordinator shutdown. Phases only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownPhase {
    Running,
    DrainingSweep,
    DisconnectingManagers,
    Complete,
}

pub struct ShutdownState {
    tx: watch::Sender<ShutdownPhase>,
}

impl ShutdownState {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ShutdownPhase::Running);
        Self { tx }
    }

    pub fn phase(&self) -> ShutdownPhase {
        *self.tx.borrow()
    }

    /// Move to `next`. Returns false when `next` is not ahead of the
    /// current phase.
    pub fn advance(&self, next: ShutdownPhase) -> bool {
        let moved = self.tx.send_if_modified(|phase| {
            if next > *phase {
                *phase = next;
                true
            } else {
                false
            }
        });
        if moved {
            tracing::info!(phase = ?next, "Shutdown phase");
        }
        moved
    }

    pub fn subscribe(&self) -> watch::Receiver<ShutdownPhase> {
        self.tx.subscribe()
    }

    /// Resolve once the shutdown has finished.
    pub async fn completed(&self) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|phase| *phase == ShutdownPhase::Complete).await;
    }
}

impl Default for ShutdownState {
    fn default() -> Self {
        Self::new()
    }
}
