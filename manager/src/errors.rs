//! Error taxonomy of the acquisition core
//!
//! Every failure that can end or block a session is expressed as an
//! [`AcquisitionError`]. Remote calls fail with [`RemoteError`] first and are
//! mapped into the taxonomy by the component that made the call, because only
//! that component knows whether "unreachable" means a connect failure or a
//! deployment failure.
//!
//! Messages never include credential material.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::deployer::HelperKind;

/// Stable, serializable discriminant of an [`AcquisitionError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Authentication,
    NetworkUnreachable,
    TimeoutExceeded,
    DeploymentFailure,
    AcquisitionStalled,
    DuplicateSession,
    UserCancelled,
    CleanupFailure,
    SessionLimitReached,
    SessionNotFound,
    InvalidRequest,
    InvalidTransition,
    Configuration,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AcquisitionError {
    #[error("Authentication rejected by {target}")]
    Authentication { target: String },

    #[error("{target} is unreachable: {reason}")]
    NetworkUnreachable { target: String, reason: String },

    #[error("{operation} timed out after {}s", elapsed.as_secs_f64())]
    TimeoutExceeded { operation: String, elapsed: Duration },

    #[error("Deployment of {kind} failed: {reason}")]
    DeploymentFailure { kind: HelperKind, reason: String },

    #[error("Acquisition stalled: {kind} could not be polled {failures} times in a row")]
    AcquisitionStalled { kind: HelperKind, failures: u32 },

    #[error("Target {target} already has an active session ({session_id})")]
    DuplicateSession { target: String, session_id: Uuid },

    #[error("Cancelled by user")]
    UserCancelled,

    #[error("Cleanup incomplete, residual remote state: {}", failed_items.join(", "))]
    CleanupFailure { failed_items: Vec<String> },

    #[error("Session limit of {limit} concurrent sessions reached")]
    SessionLimitReached { limit: usize },

    #[error("Session {0} not found")]
    SessionNotFound(Uuid),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid state transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl AcquisitionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AcquisitionError::Authentication { .. } => ErrorKind::Authentication,
            AcquisitionError::NetworkUnreachable { .. } => ErrorKind::NetworkUnreachable,
            AcquisitionError::TimeoutExceeded { .. } => ErrorKind::TimeoutExceeded,
            AcquisitionError::DeploymentFailure { .. } => ErrorKind::DeploymentFailure,
            AcquisitionError::AcquisitionStalled { .. } => ErrorKind::AcquisitionStalled,
            AcquisitionError::DuplicateSession { .. } => ErrorKind::DuplicateSession,
            AcquisitionError::UserCancelled => ErrorKind::UserCancelled,
            AcquisitionError::CleanupFailure { .. } => ErrorKind::CleanupFailure,
            AcquisitionError::SessionLimitReached { .. } => ErrorKind::SessionLimitReached,
            AcquisitionError::SessionNotFound(_) => ErrorKind::SessionNotFound,
            AcquisitionError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            AcquisitionError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            AcquisitionError::Configuration(_) => ErrorKind::Configuration,
        }
    }

    /// Transient network conditions are worth another attempt; everything else is final.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AcquisitionError::NetworkUnreachable { .. } | AcquisitionError::TimeoutExceeded { .. }
        )
    }

    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        AcquisitionError::TimeoutExceeded {
            operation: operation.into(),
            elapsed,
        }
    }
}

/// Failure of a single call against the remote execution helper
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RemoteError {
    /// Credential or channel token rejected
    #[error("unauthorized")]
    Unauthorized,

    /// No route, refused connection, DNS failure
    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("request timed out")]
    Timeout,

    /// The helper understood the request and refused it
    #[error("rejected: {0}")]
    Rejected(String),

    /// Malformed or unexpected response
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Unreachable(_) | RemoteError::Timeout)
    }

    /// Map a failure of channel establishment against `target`
    pub fn into_connect_error(self, target: &str, elapsed: Duration) -> AcquisitionError {
        match self {
            RemoteError::Unauthorized => AcquisitionError::Authentication {
                target: target.to_string(),
            },
            RemoteError::Unreachable(reason) => AcquisitionError::NetworkUnreachable {
                target: target.to_string(),
                reason,
            },
            RemoteError::Timeout => AcquisitionError::timeout(format!("connect to {}", target), elapsed),
            RemoteError::Rejected(reason) | RemoteError::Protocol(reason) => {
                AcquisitionError::NetworkUnreachable {
                    target: target.to_string(),
                    reason,
                }
            }
        }
    }

    /// Map a failure that happened while deploying a helper of `kind`
    pub fn into_deploy_error(self, kind: HelperKind, step: &str) -> AcquisitionError {
        AcquisitionError::DeploymentFailure {
            kind,
            reason: format!("{} failed: {}", step, self),
        }
    }
}

/// Severity shown next to a session so residual remote state stands out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Error,
    /// Persistent warning: remote state was left behind and needs attention
    ResidualState,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Error => write!(f, "error"),
            Severity::ResidualState => write!(f, "residual-state"),
        }
    }
}
