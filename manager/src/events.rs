use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::errors::{ErrorKind, Severity};
use crate::session::SessionState;

/// Emitted on every session transition and on progress changes while running
#[derive(Debug, Clone, Serialize)]
pub struct SessionEvent {
    pub session_id: Uuid,
    pub target: String,
    pub old_state: SessionState,
    pub new_state: SessionState,
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub severity: Severity,
    pub residual_remote_state: bool,
    pub timestamp: DateTime<Utc>,
}

impl SessionEvent {
    pub fn is_progress(&self) -> bool {
        self.old_state == self.new_state
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: SessionEvent) {
        // No subscriber is a normal condition, not an error
        if self.sender.send(event).is_err() {
            debug!("Session event dropped, no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }
}
