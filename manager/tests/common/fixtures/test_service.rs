//! Acquisition service wired to the in-memory remote host

use forensic_manager::config::Config;
use forensic_manager::credential::{Credential, CredentialSource};
use forensic_manager::errors::AcquisitionError;
use forensic_manager::evidence::MemoryEvidenceStore;
use forensic_manager::remote::FakeRemote;
use forensic_manager::services::{AcquisitionService, SessionContext};
use forensic_manager::session::{SessionSnapshot, SessionState};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::test_data::accounts;
use super::test_config::TestConfigBuilder;

/// Profiles held in memory instead of `secrets.toml`
pub struct StaticProfiles {
    profiles: HashMap<String, (String, String)>,
}

impl StaticProfiles {
    pub fn with_default_profile() -> Self {
        let mut profiles = HashMap::new();
        profiles.insert(
            accounts::PROFILE.to_string(),
            (accounts::USERNAME.to_string(), accounts::SECRET.to_string()),
        );
        Self { profiles }
    }
}

#[async_trait]
impl CredentialSource for StaticProfiles {
    async fn resolve(&self, profile: &str) -> Result<Credential, AcquisitionError> {
        self.profiles
            .get(profile)
            .map(|(user, secret)| Credential::new(user.clone(), secret.clone()))
            .ok_or_else(|| AcquisitionError::InvalidRequest(format!("unknown credential profile {}", profile)))
    }
}

pub struct TestService {
    pub service: AcquisitionService,
    pub remote: FakeRemote,
    pub evidence: Arc<MemoryEvidenceStore>,
}

impl TestService {
    /// Host accepting the standard test account
    pub fn new() -> Self {
        Self::with_remote(FakeRemote::new().with_credential(accounts::USERNAME, accounts::SECRET))
    }

    pub fn with_remote(remote: FakeRemote) -> Self {
        Self::with_config(remote, TestConfigBuilder::new().build())
    }

    pub fn with_config(remote: FakeRemote, config: Config) -> Self {
        let evidence = Arc::new(MemoryEvidenceStore::new());
        let ctx = SessionContext::new(
            Arc::new(config),
            Arc::new(remote.clone()),
            Arc::new(StaticProfiles::with_default_profile()),
            evidence.clone(),
        );

        Self {
            service: AcquisitionService::new(ctx),
            remote,
            evidence,
        }
    }

    pub async fn wait_for_state(&self, id: Uuid, state: SessionState) -> SessionSnapshot {
        self.service
            .wait_for(id, |s| s.state == state)
            .await
            .expect("session disappeared from the board")
    }

    /// Wait until the session is at rest and every registry/park update has landed
    pub async fn wait_until_final(&self, id: Uuid) -> SessionSnapshot {
        self.service
            .wait_for(id, |s| s.state.is_final())
            .await
            .expect("session disappeared from the board")
    }
}
