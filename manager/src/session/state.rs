use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Init,
    Connecting,
    Connected,
    Deploying,
    Running,
    Stopping,
    Cleaned,
    /// Failure handled and cleaned up; the session rests here
    Failed,
    /// Teardown left remote state behind
    FailedCleanup,
}

impl SessionState {
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;

        matches!(
            (*self, next),
            (Init, Connecting | Stopping | Failed)
                | (Connecting, Connected | Stopping | Failed)
                | (Connected, Deploying | Stopping | Failed)
                | (Deploying, Running | Stopping | Failed)
                | (Running, Stopping | Failed)
                | (Stopping, Cleaned | FailedCleanup)
                | (Failed, FailedCleanup)
                | (FailedCleanup, Cleaned)
        )
    }

    /// States in which no more work happens on its own
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            SessionState::Cleaned | SessionState::Failed | SessionState::FailedCleanup
        )
    }

    /// States with no outgoing transition except a retried cleanup
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Cleaned | SessionState::FailedCleanup)
    }

    pub fn severity(&self) -> Severity {
        match self {
            SessionState::FailedCleanup => Severity::ResidualState,
            SessionState::Failed => Severity::Error,
            _ => Severity::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Init => "INIT",
            SessionState::Connecting => "CONNECTING",
            SessionState::Connected => "CONNECTED",
            SessionState::Deploying => "DEPLOYING",
            SessionState::Running => "RUNNING",
            SessionState::Stopping => "STOPPING",
            SessionState::Cleaned => "CLEANED",
            SessionState::Failed => "FAILED",
            SessionState::FailedCleanup => "FAILED_CLEANUP",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
