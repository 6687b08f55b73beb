//! Scriptable in-memory target host
//!
//! Backs the session tests and local dry runs: it accepts configured
//! credentials, keeps a file table and a process table, and can be told to
//! misbehave (unreachable, hanging, failing teardown steps).

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use super::{ChannelToken, ProcessHandle, ProcessStatus, RemoteChannel, RemoteExecutor};
use crate::credential::Credential;
use crate::errors::RemoteError;
use crate::target::Target;

#[derive(Debug, Clone)]
pub struct FakeProcess {
    pub command: String,
    pub args: Vec<String>,
    pub status: ProcessStatus,
}

#[derive(Default)]
struct FakeState {
    accepted: Vec<(String, String)>,
    unreachable_attempts: u32,
    always_unreachable: bool,
    hang_open: bool,
    hang_copy: bool,
    failing_copies: u32,
    open_attempts: u32,
    channels: HashSet<String>,
    files: HashMap<String, u64>,
    processes: HashMap<String, FakeProcess>,
    unresponsive_ports: HashSet<u16>,
    exit_on_launch: Vec<(String, i32)>,
    failing_terminate: HashSet<String>,
    failing_remove: HashSet<String>,
    failing_status: HashSet<String>,
    failing_close: bool,
    calls: Vec<String>,
}

#[derive(Clone, Default)]
pub struct FakeRemote {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        // A panicking test thread must not hide the state from the assertions that follow
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // --- scripting ---

    pub fn with_credential(self, username: &str, secret: &str) -> Self {
        self.state()
            .accepted
            .push((username.to_string(), secret.to_string()));
        self
    }

    /// The first `attempts` channel openings fail as unreachable
    pub fn with_unreachable_attempts(self, attempts: u32) -> Self {
        self.state().unreachable_attempts = attempts;
        self
    }

    pub fn always_unreachable(self) -> Self {
        self.state().always_unreachable = true;
        self
    }

    /// Channel opening never answers
    pub fn hanging_open(self) -> Self {
        self.state().hang_open = true;
        self
    }

    /// File copies never complete
    pub fn hanging_copy(self) -> Self {
        self.state().hang_copy = true;
        self
    }

    /// The next `copies` file copies fail as a dropped connection
    pub fn with_failing_copies(self, copies: u32) -> Self {
        self.state().failing_copies = copies;
        self
    }

    pub fn with_unresponsive_port(self, port: u16) -> Self {
        self.state().unresponsive_ports.insert(port);
        self
    }

    /// Processes whose command contains `pattern` exit right after launch
    pub fn exiting_on_launch(self, pattern: &str, exit_code: i32) -> Self {
        self.state()
            .exit_on_launch
            .push((pattern.to_string(), exit_code));
        self
    }

    pub fn failing_terminate(self, pattern: &str) -> Self {
        self.state().failing_terminate.insert(pattern.to_string());
        self
    }

    pub fn failing_remove(self, pattern: &str) -> Self {
        self.state().failing_remove.insert(pattern.to_string());
        self
    }

    /// Status queries for processes whose command contains `pattern` fail
    pub fn failing_status(self, pattern: &str) -> Self {
        self.state().failing_status.insert(pattern.to_string());
        self
    }

    pub fn failing_close(self) -> Self {
        self.state().failing_close = true;
        self
    }

    /// Let previously failing teardown steps succeed again
    pub fn heal(&self) {
        let mut state = self.state();
        state.failing_terminate.clear();
        state.failing_remove.clear();
        state.failing_close = false;
    }

    pub fn set_file_size(&self, path: &str, size: u64) {
        self.state().files.insert(path.to_string(), size);
    }

    /// Mark running processes whose command contains `pattern` as exited
    pub fn finish_process_matching(&self, pattern: &str, exit_code: i32) -> usize {
        let mut state = self.state();
        let mut finished = 0;
        for process in state.processes.values_mut() {
            if process.command.contains(pattern) && process.status.running {
                process.status = ProcessStatus::exited(exit_code);
                finished += 1;
            }
        }
        finished
    }

    // --- inspection ---

    pub fn open_attempts(&self) -> u32 {
        self.state().open_attempts
    }

    pub fn open_channels(&self) -> usize {
        self.state().channels.len()
    }

    pub fn has_file(&self, path: &str) -> bool {
        self.state().files.contains_key(path)
    }

    pub fn files(&self) -> Vec<String> {
        self.state().files.keys().cloned().collect()
    }

    pub fn running_processes(&self) -> Vec<FakeProcess> {
        self.state()
            .processes
            .values()
            .filter(|p| p.status.running)
            .cloned()
            .collect()
    }

    pub fn launched_processes(&self) -> Vec<FakeProcess> {
        self.state().processes.values().cloned().collect()
    }

    /// Every call made against the fake, in order
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    fn check_channel(state: &FakeState, channel: &RemoteChannel) -> Result<(), RemoteError> {
        if state.channels.contains(channel.token.as_str()) {
            Ok(())
        } else {
            Err(RemoteError::Unauthorized)
        }
    }
}

fn matches_any(patterns: &HashSet<String>, value: &str) -> bool {
    patterns.iter().any(|p| value.contains(p.as_str()))
}

#[async_trait]
impl RemoteExecutor for FakeRemote {
    async fn open_channel(
        &self,
        target: &Target,
        credential: &Credential,
    ) -> Result<RemoteChannel, RemoteError> {
        let hang = {
            let mut state = self.state();
            state.open_attempts += 1;
            state.calls.push(format!("open_channel {}", target.address));
            state.hang_open
        };

        if hang {
            std::future::pending::<()>().await;
        }

        let mut state = self.state();

        if state.always_unreachable {
            return Err(RemoteError::Unreachable("no route to host".to_string()));
        }
        if state.unreachable_attempts > 0 {
            state.unreachable_attempts -= 1;
            return Err(RemoteError::Unreachable("connection refused".to_string()));
        }

        let accepted = state
            .accepted
            .iter()
            .any(|(user, secret)| user == &credential.username && secret == credential.secret.expose());
        if !accepted {
            return Err(RemoteError::Unauthorized);
        }

        let token = Uuid::new_v4().to_string();
        state.channels.insert(token.clone());

        Ok(RemoteChannel {
            target: target.clone(),
            token: ChannelToken::new(token),
        })
    }

    async fn ping(&self, channel: &RemoteChannel) -> Result<(), RemoteError> {
        let state = self.state();
        Self::check_channel(&state, channel)
    }

    async fn close_channel(&self, channel: &RemoteChannel) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.calls.push("close_channel".to_string());
        if state.failing_close {
            return Err(RemoteError::Unreachable("connection reset".to_string()));
        }
        state.channels.remove(channel.token.as_str());
        Ok(())
    }

    async fn copy_file(
        &self,
        channel: &RemoteChannel,
        _local: &Path,
        remote_path: &str,
    ) -> Result<(), RemoteError> {
        let hang = {
            let mut state = self.state();
            Self::check_channel(&state, channel)?;
            state.calls.push(format!("copy_file {}", remote_path));
            if state.failing_copies > 0 {
                state.failing_copies -= 1;
                return Err(RemoteError::Unreachable("connection reset".to_string()));
            }
            // A partially written file exists as soon as the copy starts
            state.files.insert(remote_path.to_string(), 0);
            state.hang_copy
        };

        if hang {
            std::future::pending::<()>().await;
        }

        self.state().files.insert(remote_path.to_string(), 4096);
        Ok(())
    }

    async fn remove_file(
        &self,
        channel: &RemoteChannel,
        remote_path: &str,
    ) -> Result<bool, RemoteError> {
        let mut state = self.state();
        Self::check_channel(&state, channel)?;
        state.calls.push(format!("remove_file {}", remote_path));
        if matches_any(&state.failing_remove, remote_path) {
            return Err(RemoteError::Rejected(format!("{} is locked", remote_path)));
        }
        Ok(state.files.remove(remote_path).is_some())
    }

    async fn file_size(
        &self,
        channel: &RemoteChannel,
        remote_path: &str,
    ) -> Result<Option<u64>, RemoteError> {
        let state = self.state();
        Self::check_channel(&state, channel)?;
        Ok(state.files.get(remote_path).copied())
    }

    async fn launch(
        &self,
        channel: &RemoteChannel,
        command: &str,
        args: &[String],
    ) -> Result<ProcessHandle, RemoteError> {
        let mut state = self.state();
        Self::check_channel(&state, channel)?;
        state.calls.push(format!("launch {}", command));

        let status = state
            .exit_on_launch
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, code)| ProcessStatus::exited(*code))
            .unwrap_or_else(ProcessStatus::running);

        let handle = Uuid::new_v4().to_string();
        state.processes.insert(
            handle.clone(),
            FakeProcess {
                command: command.to_string(),
                args: args.to_vec(),
                status,
            },
        );
        Ok(ProcessHandle(handle))
    }

    async fn status(
        &self,
        channel: &RemoteChannel,
        handle: &ProcessHandle,
    ) -> Result<ProcessStatus, RemoteError> {
        let state = self.state();
        Self::check_channel(&state, channel)?;
        let process = state
            .processes
            .get(&handle.0)
            .ok_or_else(|| RemoteError::Rejected(format!("unknown process {}", handle)))?;
        if matches_any(&state.failing_status, &process.command) {
            return Err(RemoteError::Timeout);
        }
        Ok(process.status)
    }

    async fn terminate(
        &self,
        channel: &RemoteChannel,
        handle: &ProcessHandle,
    ) -> Result<(), RemoteError> {
        let mut state = self.state();
        Self::check_channel(&state, channel)?;
        state.calls.push(format!("terminate {}", handle));

        let failing = state
            .processes
            .get(&handle.0)
            .map(|p| matches_any(&state.failing_terminate, &p.command))
            .unwrap_or(false);
        if failing {
            return Err(RemoteError::Rejected("access denied".to_string()));
        }

        if let Some(process) = state.processes.get_mut(&handle.0) {
            if process.status.running {
                process.status = ProcessStatus::exited(-1);
            }
        }
        Ok(())
    }

    async fn probe(&self, _target: &Target, port: u16) -> Result<bool, RemoteError> {
        let state = self.state();
        if state.unresponsive_ports.contains(&port) {
            return Ok(false);
        }
        let port_arg = port.to_string();
        Ok(state
            .processes
            .values()
            .any(|p| p.status.running && p.args.iter().any(|a| a.contains(&port_arg))))
    }
}
