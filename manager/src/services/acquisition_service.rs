//! Command surface of the acquisition core
//!
//! Spawns one task per session, routes stop/cancel requests to it, and keeps
//! sessions that ended with residual remote state parked for retried cleanup.

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cancel::{CancelToken, StopReason};
use crate::cleanup::{CleanupCoordinator, CleanupResult};
use crate::config::Config;
use crate::connection::ConnectionManager;
use crate::credential::{CredentialInput, CredentialSource};
use crate::deployer::{HelperKind, ServiceDeployer};
use crate::errors::AcquisitionError;
use crate::events::{EventBus, SessionEvent};
use crate::evidence::EvidenceStore;
use crate::progress::ProgressTracker;
use crate::registry::{ActiveSession, RegistryStatus, SessionRegistry};
use crate::remote::RemoteExecutor;
use crate::session::runner::RunOutcome;
use crate::session::{AcquisitionSession, SessionBoard, SessionRunner, SessionSnapshot, SessionState};

/// Request to start a session; `Debug` never shows the secret
#[derive(Debug, Clone, Deserialize)]
pub struct SessionRequest {
    /// Known target name or plain address
    pub target: String,
    pub deployments: Vec<HelperKind>,
    pub credential: CredentialInput,
    #[serde(default)]
    pub case_id: Option<String>,
    #[serde(default)]
    pub operator: Option<String>,
}

/// Components and shared state every session task works with
pub struct SessionContext {
    pub config: Arc<Config>,
    pub connections: Arc<ConnectionManager>,
    pub deployer: Arc<ServiceDeployer>,
    pub progress: Arc<ProgressTracker>,
    pub cleanup: Arc<CleanupCoordinator>,
    pub credentials: Arc<dyn CredentialSource>,
    pub evidence: Arc<dyn EvidenceStore>,
    pub registry: SessionRegistry,
    pub events: EventBus,
    pub board: SessionBoard,
}

impl SessionContext {
    pub fn new(
        config: Arc<Config>,
        executor: Arc<dyn RemoteExecutor>,
        credentials: Arc<dyn CredentialSource>,
        evidence: Arc<dyn EvidenceStore>,
    ) -> Self {
        let connections = Arc::new(ConnectionManager::new(executor.clone(), &config.connection));
        let deployer = Arc::new(ServiceDeployer::new(executor.clone(), config.deployment.clone()));
        let progress = Arc::new(ProgressTracker::new(executor, &config.progress));
        let cleanup = Arc::new(CleanupCoordinator::new(
            connections.clone(),
            deployer.clone(),
            config.cleanup.retry_policy(),
        ));

        Self {
            registry: SessionRegistry::new(config.limits.max_concurrent_sessions),
            events: EventBus::new(config.limits.event_channel_capacity),
            board: SessionBoard::new(),
            config,
            connections,
            deployer,
            progress,
            cleanup,
            credentials,
            evidence,
        }
    }
}

/// Session at rest in FAILED_CLEANUP, kept for retried cleanup
struct ParkedSession {
    session: AcquisitionSession,
    /// Profile name the session connected with; inline credentials are never kept
    profile: Option<String>,
}

#[derive(Clone)]
pub struct AcquisitionService {
    ctx: Arc<SessionContext>,
    controls: Arc<RwLock<HashMap<Uuid, CancelToken>>>, // running session -> stop signal
    parked: Arc<Mutex<HashMap<Uuid, ParkedSession>>>,
}

impl AcquisitionService {
    pub fn new(ctx: SessionContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            controls: Arc::new(RwLock::new(HashMap::new())),
            parked: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.ctx.config
    }

    fn validate(&self, request: &SessionRequest) -> Result<(), AcquisitionError> {
        if request.target.trim().is_empty() {
            return Err(AcquisitionError::InvalidRequest("target is empty".to_string()));
        }
        if request.deployments.is_empty() {
            return Err(AcquisitionError::InvalidRequest(
                "at least one deployment is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for kind in &request.deployments {
            if !seen.insert(*kind) {
                return Err(AcquisitionError::InvalidRequest(format!(
                    "{} requested more than once",
                    kind
                )));
            }
            if self.ctx.config.tools.get(*kind).is_none() {
                return Err(AcquisitionError::InvalidRequest(format!(
                    "no tool configured for {}",
                    kind
                )));
            }
        }
        Ok(())
    }

    /// Register and start a session; it runs as its own task
    #[instrument(skip(self, request), fields(target = %request.target))]
    pub async fn request_session(&self, request: SessionRequest) -> Result<Uuid, AcquisitionError> {
        self.validate(&request)?;

        let SessionRequest {
            target,
            deployments,
            credential,
            case_id,
            operator,
        } = request;

        let target = self.ctx.config.resolve_target(&target);
        let session = AcquisitionSession::new(target, deployments, case_id, operator.clone());
        let session_id = session.id;

        self.ctx
            .registry
            .try_register(&session.target, session_id, &session.requested, operator)
            .await?;

        let profile = match &credential {
            CredentialInput::Profile(name) => Some(name.clone()),
            CredentialInput::Inline(_) => None,
        };

        let cancel = CancelToken::new();
        self.controls.write().await.insert(session_id, cancel.clone());
        self.ctx.board.publish(session.snapshot()).await;

        info!(
            "Session {} requested on {} for {:?}",
            session_id, session.target, session.requested
        );

        let runner = SessionRunner::new(self.ctx.clone(), session, credential, cancel);
        let service = self.clone();
        tokio::spawn(async move {
            let outcome = runner.run().await;
            service.finish(outcome, profile).await;
        });

        Ok(session_id)
    }

    /// Release or park the finished session, then publish its final state
    async fn finish(&self, outcome: RunOutcome, profile: Option<String>) {
        let RunOutcome {
            session,
            final_events,
        } = outcome;
        let session_id = session.id;
        let identity = session.target.identity();
        let snapshot = session.snapshot();

        if session.state() == SessionState::FailedCleanup {
            warn!(
                "Session {} left residual remote state on {}, keeping {} locked",
                session_id, session.target.address, identity
            );
            self.parked
                .lock()
                .await
                .insert(session_id, ParkedSession { session, profile });
        } else {
            self.ctx.registry.release(&identity, session_id).await;
        }

        self.ctx.board.publish(snapshot.clone()).await;
        for event in final_events {
            self.ctx.events.publish(event);
        }
        // Last, so an empty control map means every session is at rest
        self.controls.write().await.remove(&session_id);

        info!(
            "Session {} ended in {}: {}",
            session_id,
            snapshot.state,
            snapshot.summary.as_deref().unwrap_or("")
        );
    }

    async fn signal(&self, session_id: Uuid, reason: StopReason) -> Result<(), AcquisitionError> {
        let snapshot = self
            .ctx
            .board
            .get(session_id)
            .await
            .ok_or(AcquisitionError::SessionNotFound(session_id))?;

        let controls = self.controls.read().await;
        match controls.get(&session_id) {
            Some(token) if !snapshot.state.is_final() => {
                if token.request(reason) {
                    info!("Session {}: {:?} requested", session_id, reason);
                } else {
                    debug!("Session {} is already winding down", session_id);
                }
                Ok(())
            }
            _ => Err(AcquisitionError::InvalidRequest(format!(
                "session {} is no longer running",
                session_id
            ))),
        }
    }

    pub async fn stop_session(&self, session_id: Uuid) -> Result<(), AcquisitionError> {
        self.signal(session_id, StopReason::Requested).await
    }

    pub async fn cancel_session(&self, session_id: Uuid) -> Result<(), AcquisitionError> {
        self.signal(session_id, StopReason::Cancelled).await
    }

    /// Retry the teardown of a session left in FAILED_CLEANUP
    ///
    /// When its channel is already closed a credential is needed to reconnect;
    /// without one the profile the session started with is used, if any.
    #[instrument(skip(self, credential))]
    pub async fn retry_cleanup(
        &self,
        session_id: Uuid,
        credential: Option<CredentialInput>,
    ) -> Result<CleanupResult, AcquisitionError> {
        // Taken out of the map so the lock is not held across network calls
        let mut entry = match self.parked.lock().await.remove(&session_id) {
            Some(entry) => entry,
            None if self.ctx.board.get(session_id).await.is_some() => {
                return Err(AcquisitionError::InvalidRequest(format!(
                    "session {} is not awaiting cleanup",
                    session_id
                )))
            }
            None => return Err(AcquisitionError::SessionNotFound(session_id)),
        };

        let outcome = self.retry_parked(&mut entry, credential).await;

        let snapshot = entry.session.snapshot();
        match &outcome {
            Ok(result) if result.fully_succeeded => {
                let identity = entry.session.target.identity();
                match entry.session.transition(SessionState::Cleaned) {
                    Ok(event) => {
                        self.ctx.registry.release(&identity, session_id).await;
                        self.ctx.board.publish(entry.session.snapshot()).await;
                        self.ctx.events.publish(event);
                        info!("Residual state of session {} removed", session_id);
                    }
                    Err(e) => {
                        warn!("Session {}: {}", session_id, e);
                        self.parked.lock().await.insert(session_id, entry);
                    }
                }
            }
            _ => {
                self.ctx.board.publish(snapshot).await;
                let event: SessionEvent = entry.session.event(SessionState::FailedCleanup);
                self.ctx.events.publish(event);
                self.parked.lock().await.insert(session_id, entry);
            }
        }

        outcome
    }

    async fn retry_parked(
        &self,
        entry: &mut ParkedSession,
        credential: Option<CredentialInput>,
    ) -> Result<CleanupResult, AcquisitionError> {
        let session = &mut entry.session;

        if !session.has_open_connection() {
            let input = credential
                .or_else(|| entry.profile.clone().map(CredentialInput::Profile))
                .ok_or_else(|| {
                    AcquisitionError::InvalidRequest(
                        "channel is closed, a credential is required to reconnect".to_string(),
                    )
                })?;
            let credential = input.resolve(self.ctx.credentials.as_ref()).await?;
            let connection = self
                .ctx
                .connections
                .connect(
                    &session.target,
                    credential,
                    self.ctx.config.connection.timeout(),
                    &CancelToken::new(),
                )
                .await?;
            session.connection = Some(connection);
        }

        let result = self.ctx.cleanup.cleanup(session).await;

        if result.fully_succeeded {
            session.residual_items.clear();
            session.summary = Some(format!(
                "{}; residual remote state removed by retried cleanup",
                session.summary.as_deref().unwrap_or("Session ended")
            ));
        } else {
            session.residual_items = result.failed_items.clone();
            session.error = Some(AcquisitionError::CleanupFailure {
                failed_items: result.failed_items.clone(),
            });
        }

        Ok(result)
    }

    /// Retry every parked session that can be retried without operator input
    ///
    /// Returns the number of sessions whose remote state is now gone.
    pub async fn retry_parked_cleanups(&self) -> usize {
        let candidates: Vec<Uuid> = {
            let parked = self.parked.lock().await;
            parked
                .iter()
                .filter(|(_, p)| p.profile.is_some() || p.session.has_open_connection())
                .map(|(id, _)| *id)
                .collect()
        };

        let mut resolved = 0;
        for session_id in candidates {
            match self.retry_cleanup(session_id, None).await {
                Ok(result) if result.fully_succeeded => resolved += 1,
                Ok(result) => warn!(
                    "Session {} still has residual remote state: {}",
                    session_id,
                    result.failed_items.join(", ")
                ),
                Err(e) => warn!("Retried cleanup of session {} failed: {}", session_id, e),
            }
        }
        resolved
    }

    pub async fn parked_sessions(&self) -> Vec<Uuid> {
        self.parked.lock().await.keys().copied().collect()
    }

    pub async fn get_session(&self, session_id: Uuid) -> Result<SessionSnapshot, AcquisitionError> {
        self.ctx
            .board
            .get(session_id)
            .await
            .ok_or(AcquisitionError::SessionNotFound(session_id))
    }

    pub async fn list_sessions(&self) -> Vec<SessionSnapshot> {
        self.ctx.board.list().await
    }

    /// Wait until the session's snapshot satisfies `predicate`
    pub async fn wait_for<F>(&self, session_id: Uuid, predicate: F) -> Result<SessionSnapshot, AcquisitionError>
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        self.ctx.board.wait_for(session_id, predicate).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.ctx.events.subscribe()
    }

    pub async fn active_targets(&self) -> RegistryStatus {
        self.ctx.registry.status().await
    }

    /// Operator override: unlock a target whose session left residual state
    pub async fn force_release(&self, target: &str) -> Result<ActiveSession, AcquisitionError> {
        let identity = self.ctx.config.resolve_target(target).identity();
        self.ctx.registry.force_release(&identity).await
    }

    /// Cancel every running session and wait for them to come to rest
    pub async fn shutdown(&self, grace: Duration) {
        let running: Vec<CancelToken> = self.controls.read().await.values().cloned().collect();
        if running.is_empty() {
            return;
        }

        info!("Cancelling {} running session(s)", running.len());
        for token in &running {
            token.request(StopReason::Cancelled);
        }

        let wait = async {
            while !self.controls.read().await.is_empty() {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };
        if tokio::time::timeout(grace, wait).await.is_err() {
            warn!("Sessions still cleaning up after {:?}, exiting anyway", grace);
        }
    }
}
