// File: agent/src/services/process_manager.rs
use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::{Child, Command as AsyncCommand};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::types::ProcessStatusData;

struct ProcessRecord {
    command: String,
    child: Child,
    started_at: DateTime<Utc>,
    exit_code: Option<i32>,
    finished_at: Option<DateTime<Utc>>,
}

impl ProcessRecord {
    /// Reap the child if it has exited since the last look
    fn refresh(&mut self) {
        if self.finished_at.is_some() {
            return;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                // Killed by a signal: no exit code
                self.exit_code = Some(status.code().unwrap_or(-1));
                self.finished_at = Some(Utc::now());
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to query process {}: {}", self.command, e),
        }
    }

    fn status(&self) -> ProcessStatusData {
        ProcessStatusData {
            running: self.finished_at.is_none(),
            exit_code: self.exit_code,
        }
    }
}

#[derive(Clone)]
pub struct ProcessManager {
    processes: Arc<RwLock<HashMap<String, ProcessRecord>>>,
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessManager {
    pub fn new() -> Self {
        Self {
            processes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn launch(&self, command: &str, args: &[String]) -> Result<String> {
        if command.trim().is_empty() {
            return Err(anyhow!("Command is empty"));
        }

        let child = AsyncCommand::new(command)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow!("Failed to spawn {}: {}", command, e))?;

        let handle = Uuid::new_v4().simple().to_string();
        info!(
            "Launched {} (pid {:?}) as {}",
            command,
            child.id(),
            handle
        );

        self.processes.write().await.insert(
            handle.clone(),
            ProcessRecord {
                command: command.to_string(),
                child,
                started_at: Utc::now(),
                exit_code: None,
                finished_at: None,
            },
        );
        Ok(handle)
    }

    pub async fn status(&self, handle: &str) -> Option<ProcessStatusData> {
        let mut processes = self.processes.write().await;
        let record = processes.get_mut(handle)?;
        record.refresh();
        Some(record.status())
    }

    /// Kill the process; unknown or already finished handles are a no-op
    pub async fn terminate(&self, handle: &str) -> Result<()> {
        let mut processes = self.processes.write().await;
        let Some(record) = processes.get_mut(handle) else {
            info!("Terminate of unknown process {} ignored", handle);
            return Ok(());
        };

        record.refresh();
        if record.finished_at.is_some() {
            return Ok(());
        }

        record
            .child
            .kill()
            .await
            .map_err(|e| anyhow!("Failed to terminate {}: {}", record.command, e))?;
        record.refresh();
        if record.finished_at.is_none() {
            record.exit_code = Some(-1);
            record.finished_at = Some(Utc::now());
        }

        info!(
            "Terminated {} ({}) after {}s",
            record.command,
            handle,
            (Utc::now() - record.started_at).num_seconds()
        );
        Ok(())
    }

    /// Forget finished processes older than `retention`
    pub async fn sweep_finished(&self, retention: Duration) -> usize {
        let mut processes = self.processes.write().await;
        let cutoff = Utc::now() - retention;
        let before = processes.len();

        processes.retain(|_, record| {
            record.refresh();
            record.finished_at.is_none_or(|finished| finished > cutoff)
        });

        let swept = before - processes.len();
        if swept > 0 {
            info!("Forgot {} finished process records", swept);
        }
        swept
    }

    pub async fn running_count(&self) -> usize {
        let mut processes = self.processes.write().await;
        processes
            .values_mut()
            .map(|record| {
                record.refresh();
                record.finished_at.is_none()
            })
            .filter(|running| *running)
            .count()
    }
}
