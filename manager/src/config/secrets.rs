//! Credential profiles for the administrative channel.
//!
//! Profiles live in a separate TOML file (config/secrets.toml) that must be
//! excluded from version control. The file is read on every lookup so a
//! credential is only in memory for the connection attempt that needs it.
//!
//! Example secrets.toml:
//! ```toml
//! [credentials.field-team]
//! username = "CORP\\ir-analyst"
//! password = "change-me"
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::credential::{Credential, CredentialSource};
use crate::errors::AcquisitionError;

/// Structure matching the secrets.toml file format
#[derive(Deserialize, Default)]
pub struct SecretsFile {
    #[serde(default)]
    pub credentials: HashMap<String, Credential>,
}

/// Resolves credential profiles from the secrets file on demand
pub struct SecretsCredentialSource {
    path: PathBuf,
}

impl SecretsCredentialSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if !path.exists() {
            warn!(
                "Secrets file not found at {:?}, only inline credentials will work",
                path
            );
        }
        Self { path }
    }

    async fn load(path: &Path) -> Result<SecretsFile> {
        if !path.exists() {
            return Ok(SecretsFile::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read secrets file: {:?}", path))?;

        // toml errors quote the offending line, which may hold a password
        toml::from_str(&content)
            .map_err(|_| anyhow::anyhow!("Failed to parse secrets file: {:?}", path))
    }
}

#[async_trait]
impl CredentialSource for SecretsCredentialSource {
    async fn resolve(&self, profile: &str) -> Result<Credential, AcquisitionError> {
        let mut secrets = Self::load(&self.path)
            .await
            .map_err(|e| AcquisitionError::Configuration(e.to_string()))?;

        debug!("Resolving credential profile '{}'", profile);

        secrets.credentials.remove(profile).ok_or_else(|| {
            AcquisitionError::Configuration(format!("credential profile '{}' not found", profile))
        })
    }
}
