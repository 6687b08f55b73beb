//! Cooperative stop signal shared by a session and everything it spawns

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

/// Why a session was asked to wind down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Operator asked for an orderly stop
    Requested,
    /// Operator cancelled the session
    Cancelled,
    /// Every deployment finished its task
    Completed,
}

/// Clonable token observed at every suspension point of a session
///
/// The first reason wins; later requests are ignored.
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<Option<StopReason>>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Returns true when this call was the one that set the reason
    pub fn request(&self, reason: StopReason) -> bool {
        self.sender.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        })
    }

    pub fn reason(&self) -> Option<StopReason> {
        *self.sender.borrow()
    }

    pub fn is_requested(&self) -> bool {
        self.reason().is_some()
    }

    /// Resolves once a stop has been requested
    pub async fn cancelled(&self) -> StopReason {
        let mut receiver = self.sender.subscribe();
        loop {
            if let Some(reason) = *receiver.borrow_and_update() {
                return reason;
            }
            // The sender lives in `self`, so the channel cannot close while we wait
            if receiver.changed().await.is_err() {
                return StopReason::Cancelled;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
