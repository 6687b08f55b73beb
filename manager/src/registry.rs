//! Active-session registry
//!
//! Process-wide map from target identity to the session currently working on
//! it. A target has at most one entry; the entry is added when a session is
//! requested and removed once that session has come to rest with its remote
//! state cleaned up.
//!
//! # Key Features
//!
//! - **Concurrent session prevention**: only one session per target
//! - **Visibility**: who started what, when, and with which helpers
//! - **Optional global limit** on concurrent sessions
//! - **Operator override**: force-release a target locked by residual state
//!
//! # Usage
//!
//! ```ignore
//! registry.try_register(&target, session_id, &kinds, Some("analyst@corp".into())).await?;
//!
//! // Run the session...
//!
//! registry.release(&target.identity(), session_id).await;
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::deployer::HelperKind;
use crate::errors::AcquisitionError;
use crate::target::Target;

#[derive(Debug, Clone, Serialize)]
pub struct ActiveSession {
    pub session_id: Uuid,
    pub target: String,
    pub requested: Vec<HelperKind>,
    pub operator: Option<String>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryStatus {
    pub active_targets: HashMap<String, ActiveSession>,
    pub total_active: usize,
}

#[derive(Clone)]
pub struct SessionRegistry {
    active: Arc<RwLock<HashMap<String, ActiveSession>>>, // target identity -> session
    max_sessions: Option<usize>,
}

impl SessionRegistry {
    pub fn new(max_sessions: Option<usize>) -> Self {
        Self {
            active: Arc::new(RwLock::new(HashMap::new())),
            max_sessions,
        }
    }

    /// Claim `target` for a new session
    ///
    /// Fails without side effects when the target already has a session or
    /// the global limit is reached.
    #[instrument(skip(self, requested), fields(target = %target.address, session_id = %session_id))]
    pub async fn try_register(
        &self,
        target: &Target,
        session_id: Uuid,
        requested: &[HelperKind],
        operator: Option<String>,
    ) -> Result<(), AcquisitionError> {
        let identity = target.identity();
        let mut active = self.active.write().await;

        if let Some(current) = active.get(&identity) {
            let running_for = Utc::now().signed_duration_since(current.started_at);
            warn!(
                "Target {} already has session {} (started {}m ago)",
                target.address,
                current.session_id,
                running_for.num_minutes()
            );
            return Err(AcquisitionError::DuplicateSession {
                target: target.address.clone(),
                session_id: current.session_id,
            });
        }

        if let Some(limit) = self.max_sessions {
            if active.len() >= limit {
                return Err(AcquisitionError::SessionLimitReached { limit });
            }
        }

        active.insert(
            identity,
            ActiveSession {
                session_id,
                target: target.address.clone(),
                requested: requested.to_vec(),
                operator,
                started_at: Utc::now(),
            },
        );
        info!("Registered session {} on {}", session_id, target.address);
        Ok(())
    }

    /// Remove the entry of `session_id`; an entry owned by another session is left alone
    #[instrument(skip(self), fields(target = %identity))]
    pub async fn release(&self, identity: &str, session_id: Uuid) -> bool {
        let mut active = self.active.write().await;

        match active.get(identity) {
            Some(entry) if entry.session_id == session_id => {
                let duration = Utc::now().signed_duration_since(entry.started_at);
                info!(
                    "Released {} from session {} (held {}m)",
                    identity,
                    session_id,
                    duration.num_minutes()
                );
                active.remove(identity);
                true
            }
            Some(entry) => {
                warn!(
                    "Not releasing {}: held by session {}, not {}",
                    identity, entry.session_id, session_id
                );
                false
            }
            None => false,
        }
    }

    /// Operator override for a target left locked by residual remote state
    pub async fn force_release(&self, identity: &str) -> Result<ActiveSession, AcquisitionError> {
        let identity = identity.trim().to_ascii_lowercase();
        let mut active = self.active.write().await;

        match active.remove(&identity) {
            Some(entry) => {
                warn!(
                    "Force-released {} from session {} (held for {}m)",
                    identity,
                    entry.session_id,
                    Utc::now()
                        .signed_duration_since(entry.started_at)
                        .num_minutes()
                );
                Ok(entry)
            }
            None => Err(AcquisitionError::InvalidRequest(format!(
                "No active session found on {}",
                identity
            ))),
        }
    }

    pub async fn status(&self) -> RegistryStatus {
        let active = self.active.read().await;
        RegistryStatus {
            active_targets: active.clone(),
            total_active: active.len(),
        }
    }

    pub async fn is_active(&self, identity: &str) -> bool {
        let active = self.active.read().await;
        active.contains_key(identity)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}
