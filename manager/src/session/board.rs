use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

use super::SessionSnapshot;
use crate::errors::AcquisitionError;

/// Latest snapshot of every session, observable per session
#[derive(Clone, Default)]
pub struct SessionBoard {
    sessions: Arc<RwLock<HashMap<Uuid, watch::Sender<SessionSnapshot>>>>,
}

impl SessionBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn publish(&self, snapshot: SessionSnapshot) {
        let mut sessions = self.sessions.write().await;
        match sessions.get(&snapshot.id) {
            Some(sender) => {
                sender.send_replace(snapshot);
            }
            None => {
                let id = snapshot.id;
                let (sender, _) = watch::channel(snapshot);
                sessions.insert(id, sender);
            }
        }
    }

    pub async fn get(&self, id: Uuid) -> Option<SessionSnapshot> {
        let sessions = self.sessions.read().await;
        sessions.get(&id).map(|sender| sender.borrow().clone())
    }

    /// Newest first
    pub async fn list(&self) -> Vec<SessionSnapshot> {
        let sessions = self.sessions.read().await;
        let mut snapshots: Vec<SessionSnapshot> = sessions
            .values()
            .map(|sender| sender.borrow().clone())
            .collect();
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        snapshots
    }

    /// Resolve with the first snapshot of `id` that satisfies `predicate`
    pub async fn wait_for<F>(&self, id: Uuid, predicate: F) -> Result<SessionSnapshot, AcquisitionError>
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        let mut receiver = {
            let sessions = self.sessions.read().await;
            sessions
                .get(&id)
                .map(|sender| sender.subscribe())
                .ok_or(AcquisitionError::SessionNotFound(id))?
        };

        let snapshot = receiver
            .wait_for(predicate)
            .await
            .map_err(|_| AcquisitionError::SessionNotFound(id))?;
        Ok(snapshot.clone())
    }
}
