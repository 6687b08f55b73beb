//! The task driving one session from INIT to rest
//!
//! Every path out of the session goes through [`SessionRunner::stop`] or
//! [`SessionRunner::fail`], and both run the cleanup coordinator before the
//! session is allowed into a final state.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::{AcquisitionSession, SessionState};
use crate::cancel::{CancelToken, StopReason};
use crate::credential::CredentialInput;
use crate::errors::AcquisitionError;
use crate::events::SessionEvent;
use crate::evidence::ArtifactDescriptor;
use crate::progress::{PollTarget, ProgressEvent, TaskStatus};
use crate::services::SessionContext;
use crate::target::Reachability;

/// Session handed back by the runner, with the final transitions it has not published yet
pub struct RunOutcome {
    pub session: AcquisitionSession,
    pub final_events: Vec<SessionEvent>,
}

enum Supervision {
    Stop(StopReason),
    Fail(AcquisitionError),
}

pub struct SessionRunner {
    ctx: Arc<SessionContext>,
    session: AcquisitionSession,
    cancel: CancelToken,
    credential: Option<CredentialInput>,
    final_events: Vec<SessionEvent>,
    completed: HashSet<Uuid>,
}

impl SessionRunner {
    pub fn new(
        ctx: Arc<SessionContext>,
        session: AcquisitionSession,
        credential: CredentialInput,
        cancel: CancelToken,
    ) -> Self {
        Self {
            ctx,
            session,
            cancel,
            credential: Some(credential),
            final_events: Vec::new(),
            completed: HashSet::new(),
        }
    }

    #[instrument(skip(self), fields(session_id = %self.session.id, target = %self.session.target.address))]
    pub async fn run(mut self) -> RunOutcome {
        if let Some(reason) = self.cancel.reason() {
            return self.stop(reason).await;
        }

        self.transition(SessionState::Connecting).await;
        if let Err(e) = self.connect().await {
            return self.abort(e).await;
        }
        self.transition(SessionState::Connected).await;

        if let Some(reason) = self.cancel.reason() {
            return self.stop(reason).await;
        }

        self.transition(SessionState::Deploying).await;
        if let Err(e) = self.deploy_all().await {
            return self.abort(e).await;
        }
        self.transition(SessionState::Running).await;

        match self.supervise().await {
            Supervision::Stop(reason) => self.stop(reason).await,
            Supervision::Fail(e) => self.fail(e).await,
        }
    }

    /// Cancellation while connecting or deploying is a stop, anything else a failure
    async fn abort(self, error: AcquisitionError) -> RunOutcome {
        match (error, self.cancel.reason()) {
            (AcquisitionError::UserCancelled, reason) => {
                self.stop(reason.unwrap_or(StopReason::Cancelled)).await
            }
            (error, _) => self.fail(error).await,
        }
    }

    async fn connect(&mut self) -> Result<(), AcquisitionError> {
        let input = self
            .credential
            .take()
            .ok_or_else(|| AcquisitionError::InvalidRequest("credential already consumed".to_string()))?;
        let credential = input.resolve(self.ctx.credentials.as_ref()).await?;

        let result = self
            .ctx
            .connections
            .connect(
                &self.session.target,
                credential,
                self.ctx.config.connection.timeout(),
                &self.cancel,
            )
            .await;

        self.session.reachability = match &result {
            Ok(_) | Err(AcquisitionError::Authentication { .. }) => Reachability::Reachable,
            Err(AcquisitionError::NetworkUnreachable { .. }) => Reachability::Unreachable,
            Err(_) => Reachability::Unknown,
        };

        self.session.connection = Some(result?);
        Ok(())
    }

    /// Deploy the requested helpers one after the other
    async fn deploy_all(&mut self) -> Result<(), AcquisitionError> {
        for kind in self.session.requested.clone() {
            let tool = self.ctx.config.tools.get(kind).cloned().ok_or_else(|| {
                AcquisitionError::Configuration(format!("no tool configured for {}", kind))
            })?;

            let result = {
                let connection = self.session.connection.as_ref().ok_or_else(|| {
                    AcquisitionError::InvalidRequest("no open channel".to_string())
                })?;
                self.ctx
                    .deployer
                    .deploy(connection, kind, &tool, &self.cancel)
                    .await
            };

            match result {
                Ok(deployment) => {
                    self.session.deployments.push(deployment);
                    self.publish_snapshot().await;
                }
                Err(failure) => {
                    if let Some(partial) = failure.partial {
                        self.session.deployments.push(partial);
                    }
                    return Err(failure.error);
                }
            }

            if self.cancel.is_requested() {
                return Err(AcquisitionError::UserCancelled);
            }
        }
        Ok(())
    }

    /// RUNNING: watch every deployment until stop, completion or failure
    async fn supervise(&mut self) -> Supervision {
        let channel = match self.session.connection.as_ref() {
            Some(connection) => connection.channel().clone(),
            None => {
                return Supervision::Fail(AcquisitionError::InvalidRequest(
                    "no open channel".to_string(),
                ))
            }
        };

        let (tx, mut rx) = mpsc::channel(crate::constants::limits::PROGRESS_CHANNEL_CAPACITY);
        let watcher_cancel = CancelToken::new();
        let watchers: Vec<_> = self
            .session
            .deployments
            .iter()
            .map(|d| {
                self.ctx.progress.spawn_watcher(
                    channel.clone(),
                    PollTarget::from(d),
                    tx.clone(),
                    watcher_cancel.clone(),
                )
            })
            .collect();
        drop(tx);

        let tools: Vec<Uuid> = self
            .session
            .deployments
            .iter()
            .filter(|d| d.kind.is_acquisition_tool())
            .map(|d| d.id)
            .collect();

        let outcome = loop {
            tokio::select! {
                reason = self.cancel.cancelled() => break Supervision::Stop(reason),
                event = rx.recv() => match event {
                    Some(ProgressEvent::Update { deployment_id, update }) => {
                        if let Some(outcome) = self.on_progress(deployment_id, update, &tools).await {
                            break outcome;
                        }
                    }
                    Some(ProgressEvent::Stalled { kind, failures, .. }) => {
                        break Supervision::Fail(AcquisitionError::AcquisitionStalled { kind, failures });
                    }
                    // Every watcher is done; only an operator can end the session now
                    None => break Supervision::Stop(self.cancel.cancelled().await),
                },
            }
        };

        watcher_cancel.request(StopReason::Completed);
        for watcher in watchers {
            watcher.abort();
        }
        outcome
    }

    async fn on_progress(
        &mut self,
        deployment_id: Uuid,
        update: crate::progress::ProgressUpdate,
        tools: &[Uuid],
    ) -> Option<Supervision> {
        let deployment = self
            .session
            .deployments
            .iter_mut()
            .find(|d| d.id == deployment_id)?;

        let previous = deployment.last_progress.replace(update.clone());
        let kind = deployment.kind;

        match update.status {
            TaskStatus::Failed { exit_code } => {
                return Some(Supervision::Fail(AcquisitionError::DeploymentFailure {
                    kind,
                    reason: format!("helper exited with code {}", exit_code),
                }));
            }
            TaskStatus::Completed if self.completed.insert(deployment_id) => {
                let descriptor = deployment.output_path.clone().map(|remote_path| ArtifactDescriptor {
                    session_id: self.session.id,
                    case_id: self.session.case_id.clone(),
                    target: self.session.target.address.clone(),
                    kind,
                    remote_path,
                    bytes: update.bytes_transferred,
                    acquired_at: Utc::now(),
                });
                if let Some(descriptor) = descriptor {
                    self.record_artifact(descriptor).await;
                }
            }
            _ => {}
        }

        let changed = previous.map(|p| p.percent != update.percent || p.status != update.status).unwrap_or(true);
        if self.session.refresh_progress() || changed {
            let event = self.session.event(SessionState::Running);
            self.publish(event).await;
        }

        if !tools.is_empty() && tools.iter().all(|id| self.completed.contains(id)) {
            info!("All acquisition tools finished on {}", self.session.target.address);
            return Some(Supervision::Stop(StopReason::Completed));
        }
        None
    }

    async fn record_artifact(&self, descriptor: ArtifactDescriptor) {
        let kind = descriptor.kind;
        if let Err(e) = self
            .ctx
            .evidence
            .record_artifact(self.session.id, descriptor)
            .await
        {
            error!("Failed to record {} artifact for session {}: {:#}", kind, self.session.id, e);
        }
    }

    /// STOPPING, cleanup, then CLEANED or FAILED_CLEANUP
    async fn stop(mut self, reason: StopReason) -> RunOutcome {
        info!("Stopping session {} ({:?})", self.session.id, reason);
        self.transition(SessionState::Stopping).await;

        let result = self.ctx.cleanup.cleanup(&mut self.session).await;
        let what = match reason {
            StopReason::Requested => "Stopped by operator".to_string(),
            StopReason::Cancelled => "Cancelled by operator".to_string(),
            StopReason::Completed => self.completion_summary(),
        };

        if result.fully_succeeded {
            self.session.summary = Some(format!("{}; all remote state removed", what));
            self.transition(SessionState::Cleaned).await;
        } else {
            self.session.summary = Some(self.residual_summary(&what, &result.failed_items));
            self.session.residual_items = result.failed_items.clone();
            self.session.error = Some(AcquisitionError::CleanupFailure {
                failed_items: result.failed_items,
            });
            self.transition(SessionState::FailedCleanup).await;
        }

        self.finish()
    }

    /// Cleanup, then FAILED (and FAILED_CLEANUP if teardown left something behind)
    async fn fail(mut self, error: AcquisitionError) -> RunOutcome {
        warn!("Session {} failed: {}", self.session.id, error);
        let what = format!("Failed: {}", error);
        self.session.error = Some(error);

        let result = self.ctx.cleanup.cleanup(&mut self.session).await;

        if result.fully_succeeded {
            self.session.summary = Some(format!("{}; all remote state removed", what));
            self.transition(SessionState::Failed).await;
        } else {
            self.session.summary = Some(self.residual_summary(&what, &result.failed_items));
            self.session.residual_items = result.failed_items;
            self.transition(SessionState::Failed).await;
            self.transition(SessionState::FailedCleanup).await;
        }

        self.finish()
    }

    fn finish(self) -> RunOutcome {
        RunOutcome {
            session: self.session,
            final_events: self.final_events,
        }
    }

    fn completion_summary(&self) -> String {
        let outputs: Vec<String> = self
            .session
            .deployments
            .iter()
            .filter(|d| self.completed.contains(&d.id))
            .map(|d| match d.last_progress.as_ref().and_then(|p| p.bytes_transferred) {
                Some(bytes) => format!("{} ({} bytes)", d.kind, bytes),
                None => d.kind.to_string(),
            })
            .collect();
        format!("Acquisition complete: {}", outputs.join(", "))
    }

    fn residual_summary(&self, what: &str, failed_items: &[String]) -> String {
        format!(
            "{}; residual remote state on {}: {}",
            what,
            self.session.target.address,
            failed_items.join(", ")
        )
    }

    /// Apply a transition; moves into final states are held back for the service to publish
    async fn transition(&mut self, next: SessionState) {
        match self.session.transition(next) {
            Ok(event) if next.is_final() => self.final_events.push(event),
            Ok(event) => self.publish(event).await,
            Err(e) => error!("Session {}: {}", self.session.id, e),
        }
    }

    async fn publish(&self, event: SessionEvent) {
        self.ctx.board.publish(self.session.snapshot()).await;
        self.ctx.events.publish(event);
    }

    async fn publish_snapshot(&self) {
        self.ctx.board.publish(self.session.snapshot()).await;
    }
}
