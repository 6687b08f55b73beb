//! Acquisition session: state, snapshots and the task that drives it

pub mod board;
pub mod runner;
pub mod state;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::connection::Connection;
use crate::deployer::{Deployment, HelperKind};
use crate::errors::{AcquisitionError, ErrorKind, Severity};
use crate::events::SessionEvent;
use crate::target::{Reachability, Target};

pub use board::SessionBoard;
pub use runner::SessionRunner;
pub use state::SessionState;

pub struct AcquisitionSession {
    pub id: Uuid,
    pub target: Target,
    pub case_id: Option<String>,
    pub operator: Option<String>,
    pub requested: Vec<HelperKind>,
    pub created_at: DateTime<Utc>,
    pub(crate) state: SessionState,
    pub(crate) deployments: Vec<Deployment>,
    pub(crate) connection: Option<Connection>,
    pub(crate) progress: Option<u8>,
    pub(crate) error: Option<AcquisitionError>,
    pub(crate) summary: Option<String>,
    pub(crate) residual_items: Vec<String>,
    pub(crate) reachability: Reachability,
    pub(crate) ended_at: Option<DateTime<Utc>>,
}

impl AcquisitionSession {
    pub fn new(
        target: Target,
        requested: Vec<HelperKind>,
        case_id: Option<String>,
        operator: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            target,
            case_id,
            operator,
            requested,
            created_at: Utc::now(),
            state: SessionState::Init,
            deployments: Vec::new(),
            connection: None,
            progress: None,
            error: None,
            summary: None,
            residual_items: Vec::new(),
            reachability: Reachability::Unknown,
            ended_at: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn deployments(&self) -> &[Deployment] {
        &self.deployments
    }

    pub fn error(&self) -> Option<&AcquisitionError> {
        self.error.as_ref()
    }

    pub fn has_open_connection(&self) -> bool {
        self.connection.as_ref().map(|c| !c.is_closed()).unwrap_or(false)
    }

    /// Move to `next` and describe the move; the only way the state changes
    pub fn transition(&mut self, next: SessionState) -> Result<SessionEvent, AcquisitionError> {
        if !self.state.can_transition_to(next) {
            return Err(AcquisitionError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }

        let old = self.state;
        self.state = next;
        if next.is_final() {
            self.ended_at = Some(Utc::now());
        }
        debug!("Session {}: {} -> {}", self.id, old, next);

        Ok(self.event(old))
    }

    /// Event for the current state, `old` being where the session came from
    pub fn event(&self, old: SessionState) -> SessionEvent {
        SessionEvent {
            session_id: self.id,
            target: self.target.address.clone(),
            old_state: old,
            new_state: self.state,
            progress: self.progress,
            error: self.error.as_ref().map(|e| e.to_string()),
            error_kind: self.error.as_ref().map(|e| e.kind()),
            summary: self.summary.clone(),
            severity: self.state.severity(),
            residual_remote_state: self.state == SessionState::FailedCleanup,
            timestamp: Utc::now(),
        }
    }

    /// Aggregate progress over the acquisition tools; `None` while unknown
    pub(crate) fn refresh_progress(&mut self) -> bool {
        let percents: Vec<Option<u8>> = self
            .deployments
            .iter()
            .filter(|d| d.kind.is_acquisition_tool())
            .map(|d| d.last_progress.as_ref().and_then(|p| p.percent))
            .collect();

        let aggregate = if percents.is_empty() || percents.iter().any(Option::is_none) {
            None
        } else {
            percents.into_iter().flatten().min()
        };

        let changed = aggregate != self.progress;
        self.progress = aggregate;
        changed
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            target: self.target.observed(self.reachability),
            case_id: self.case_id.clone(),
            operator: self.operator.clone(),
            requested: self.requested.clone(),
            state: self.state,
            deployments: self.deployments.clone(),
            connection_open: self.has_open_connection(),
            progress: self.progress,
            error: self.error.as_ref().map(|e| e.to_string()),
            error_kind: self.error.as_ref().map(|e| e.kind()),
            summary: self.summary.clone(),
            residual_remote_state: self.state == SessionState::FailedCleanup,
            residual_items: self.residual_items.clone(),
            severity: self.state.severity(),
            created_at: self.created_at,
            ended_at: self.ended_at,
        }
    }
}

/// Read-only view of a session; carries no channel token and no credential
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub target: Target,
    pub case_id: Option<String>,
    pub operator: Option<String>,
    pub requested: Vec<HelperKind>,
    pub state: SessionState,
    pub deployments: Vec<Deployment>,
    pub connection_open: bool,
    pub progress: Option<u8>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub summary: Option<String>,
    pub residual_remote_state: bool,
    pub residual_items: Vec<String>,
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> AcquisitionSession {
        AcquisitionSession::new(
            Target::new("10.0.0.5"),
            vec![HelperKind::FileBrowser],
            Some("CASE-1".to_string()),
            None,
        )
    }

    #[test]
    fn test_transition_rejects_invalid_moves() {
        let mut session = session();

        let err = session.transition(SessionState::Running).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
        assert_eq!(session.state(), SessionState::Init);

        let event = session.transition(SessionState::Connecting).unwrap();
        assert_eq!(event.old_state, SessionState::Init);
        assert_eq!(event.new_state, SessionState::Connecting);
        assert!(session.ended_at.is_none());
    }

    #[test]
    fn test_final_state_sets_end_time_and_flags() {
        let mut session = session();
        session.transition(SessionState::Connecting).unwrap();
        session.error = Some(AcquisitionError::UserCancelled);
        session.transition(SessionState::Failed).unwrap();
        let event = session.transition(SessionState::FailedCleanup).unwrap();

        assert!(session.ended_at.is_some());
        assert!(event.residual_remote_state);
        assert_eq!(event.severity, Severity::ResidualState);

        let snapshot = session.snapshot();
        assert!(snapshot.residual_remote_state);
        assert!(!snapshot.connection_open);
        assert_eq!(snapshot.error_kind, Some(ErrorKind::UserCancelled));
    }
}
