//! Contract of the remote execution helper running on a target
//!
//! The acquisition core never talks to a host directly; every remote effect
//! goes through a [`RemoteExecutor`]. [`http::HttpRemoteExecutor`] speaks to
//! the forensic agent, [`fake::FakeRemote`] is a scriptable in-memory host.

pub mod fake;
pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::credential::Credential;
use crate::errors::RemoteError;
use crate::target::Target;

pub use fake::FakeRemote;
pub use http::HttpRemoteExecutor;

/// Opaque token issued by the helper for an authenticated channel
#[derive(Clone, PartialEq, Eq)]
pub struct ChannelToken(String);

impl ChannelToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ChannelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelToken(***)")
    }
}

/// Authenticated channel to one target; cheap to clone for watchers
#[derive(Debug, Clone)]
pub struct RemoteChannel {
    pub target: Target,
    pub token: ChannelToken,
}

/// Identifier of a process launched through the helper
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessHandle(pub String);

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessStatus {
    pub running: bool,
    pub exit_code: Option<i32>,
}

impl ProcessStatus {
    pub fn running() -> Self {
        Self {
            running: true,
            exit_code: None,
        }
    }

    pub fn exited(code: i32) -> Self {
        Self {
            running: false,
            exit_code: Some(code),
        }
    }

    pub fn exited_successfully(&self) -> bool {
        !self.running && self.exit_code == Some(0)
    }
}

#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Authenticate and open an administrative channel
    async fn open_channel(
        &self,
        target: &Target,
        credential: &Credential,
    ) -> Result<RemoteChannel, RemoteError>;

    /// Liveness check of an open channel
    async fn ping(&self, channel: &RemoteChannel) -> Result<(), RemoteError>;

    /// Invalidate the channel token; closing an unknown token is not an error
    async fn close_channel(&self, channel: &RemoteChannel) -> Result<(), RemoteError>;

    async fn copy_file(
        &self,
        channel: &RemoteChannel,
        local: &Path,
        remote_path: &str,
    ) -> Result<(), RemoteError>;

    /// Returns whether something was actually removed
    async fn remove_file(&self, channel: &RemoteChannel, remote_path: &str)
        -> Result<bool, RemoteError>;

    /// `None` when the file does not exist (yet)
    async fn file_size(
        &self,
        channel: &RemoteChannel,
        remote_path: &str,
    ) -> Result<Option<u64>, RemoteError>;

    async fn launch(
        &self,
        channel: &RemoteChannel,
        command: &str,
        args: &[String],
    ) -> Result<ProcessHandle, RemoteError>;

    async fn status(
        &self,
        channel: &RemoteChannel,
        handle: &ProcessHandle,
    ) -> Result<ProcessStatus, RemoteError>;

    /// Stop the process; terminating an already finished process succeeds
    async fn terminate(
        &self,
        channel: &RemoteChannel,
        handle: &ProcessHandle,
    ) -> Result<(), RemoteError>;

    /// Whether something accepts TCP connections on `port` of the target
    async fn probe(&self, target: &Target, port: u16) -> Result<bool, RemoteError>;
}
