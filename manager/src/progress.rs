//! Progress polling of running helpers
//!
//! Each deployment gets its own watcher task on a fixed interval. A failed
//! poll is only logged; the watcher reports a stall once `stall_threshold`
//! polls in a row have failed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::config::ProgressSettings;
use crate::deployer::{Deployment, HelperKind};
use crate::errors::RemoteError;
use crate::remote::{ProcessHandle, RemoteChannel, RemoteExecutor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed { exit_code: i32 },
}

impl TaskStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, TaskStatus::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressUpdate {
    /// `None` while the total size is unknown
    pub percent: Option<u8>,
    pub bytes_transferred: Option<u64>,
    pub status: TaskStatus,
    pub observed_at: DateTime<Utc>,
}

/// What a watcher needs to poll one deployment; holds no connection
#[derive(Debug, Clone)]
pub struct PollTarget {
    pub deployment_id: Uuid,
    pub kind: HelperKind,
    pub handle: Option<ProcessHandle>,
    pub output_path: Option<String>,
    pub expected_bytes: Option<u64>,
}

impl From<&Deployment> for PollTarget {
    fn from(deployment: &Deployment) -> Self {
        Self {
            deployment_id: deployment.id,
            kind: deployment.kind,
            handle: deployment.handle.clone(),
            output_path: deployment.output_path.clone(),
            expected_bytes: deployment.expected_bytes,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Update {
        deployment_id: Uuid,
        update: ProgressUpdate,
    },
    Stalled {
        deployment_id: Uuid,
        kind: HelperKind,
        failures: u32,
    },
}

pub fn percent_of(bytes: u64, expected: Option<u64>) -> Option<u8> {
    match expected {
        Some(total) if total > 0 => Some((bytes.saturating_mul(100) / total).min(100) as u8),
        _ => None,
    }
}

pub struct ProgressTracker {
    executor: Arc<dyn RemoteExecutor>,
    poll_interval: Duration,
    stall_threshold: u32,
}

impl ProgressTracker {
    pub fn new(executor: Arc<dyn RemoteExecutor>, settings: &ProgressSettings) -> Self {
        Self {
            executor,
            poll_interval: settings.poll_interval(),
            stall_threshold: settings.stall_threshold.max(1),
        }
    }

    /// One poll: process status plus output file size
    pub async fn poll(
        &self,
        channel: &RemoteChannel,
        target: &PollTarget,
    ) -> Result<ProgressUpdate, RemoteError> {
        let status = match &target.handle {
            Some(handle) => {
                let process = self.executor.status(channel, handle).await?;
                match (process.running, process.exit_code) {
                    (true, _) => TaskStatus::Running,
                    (false, Some(0)) => TaskStatus::Completed,
                    (false, Some(code)) => TaskStatus::Failed { exit_code: code },
                    (false, None) => TaskStatus::Failed { exit_code: -1 },
                }
            }
            None => TaskStatus::Running,
        };

        let bytes_transferred = match &target.output_path {
            Some(path) => self.executor.file_size(channel, path).await?,
            None => None,
        };

        let percent = match status {
            TaskStatus::Completed => Some(100),
            _ => bytes_transferred.and_then(|bytes| percent_of(bytes, target.expected_bytes)),
        };

        Ok(ProgressUpdate {
            percent,
            bytes_transferred,
            status,
            observed_at: Utc::now(),
        })
    }

    /// Start a watcher that reports to `events` until the task finishes,
    /// stalls, the receiver goes away or `cancel` fires
    pub fn spawn_watcher(
        self: &Arc<Self>,
        channel: RemoteChannel,
        target: PollTarget,
        events: mpsc::Sender<ProgressEvent>,
        cancel: CancelToken,
    ) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move { tracker.watch(channel, target, events, cancel).await })
    }

    async fn watch(
        &self,
        channel: RemoteChannel,
        target: PollTarget,
        events: mpsc::Sender<ProgressEvent>,
        cancel: CancelToken,
    ) {
        let mut ticker = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut consecutive_failures = 0u32;

        debug!("Watching {} ({})", target.kind, target.deployment_id);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.poll(&channel, &target).await {
                Ok(update) => {
                    consecutive_failures = 0;
                    let finished = update.status.is_finished();
                    if finished {
                        info!("{} finished: {:?}", target.kind, update.status);
                    }

                    let event = ProgressEvent::Update {
                        deployment_id: target.deployment_id,
                        update,
                    };
                    if events.send(event).await.is_err() || finished {
                        break;
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(
                        "Progress poll of {} failed ({}/{}): {}",
                        target.kind, consecutive_failures, self.stall_threshold, e
                    );

                    if consecutive_failures >= self.stall_threshold {
                        let _ = events
                            .send(ProgressEvent::Stalled {
                                deployment_id: target.deployment_id,
                                kind: target.kind,
                                failures: consecutive_failures,
                            })
                            .await;
                        break;
                    }
                }
            }
        }

        debug!("Stopped watching {} ({})", target.kind, target.deployment_id);
    }
}
