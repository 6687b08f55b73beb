//! Boundary to the case/evidence store
//!
//! Completed acquisition outputs are reported here. The default store keeps
//! one `artifacts.json` per case folder under the evidence directory.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::deployer::HelperKind;

const UNASSIGNED_CASE: &str = "unassigned";
const ARTIFACTS_FILE: &str = "artifacts.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    pub session_id: Uuid,
    pub case_id: Option<String>,
    pub target: String,
    pub kind: HelperKind,
    /// Location of the output on the target
    pub remote_path: String,
    pub bytes: Option<u64>,
    pub acquired_at: DateTime<Utc>,
}

#[async_trait]
pub trait EvidenceStore: Send + Sync {
    async fn record_artifact(&self, session_id: Uuid, descriptor: ArtifactDescriptor) -> Result<()>;
}

/// Case folders as JSON on disk
pub struct JsonEvidenceStore {
    root: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonEvidenceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Case ids become directory names; anything but `[A-Za-z0-9_-]` is replaced
    fn case_dir(&self, case_id: Option<&str>) -> PathBuf {
        let name = match case_id.map(str::trim).filter(|c| !c.is_empty()) {
            Some(case_id) => case_id
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
                .collect(),
            None => UNASSIGNED_CASE.to_string(),
        };
        self.root.join(name)
    }

    pub async fn artifacts(&self, case_id: Option<&str>) -> Result<Vec<ArtifactDescriptor>> {
        Self::read_file(&self.case_dir(case_id).join(ARTIFACTS_FILE)).await
    }

    async fn read_file(path: &Path) -> Result<Vec<ArtifactDescriptor>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }
}

#[async_trait]
impl EvidenceStore for JsonEvidenceStore {
    async fn record_artifact(&self, session_id: Uuid, descriptor: ArtifactDescriptor) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let dir = self.case_dir(descriptor.case_id.as_deref());
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create case folder {}", dir.display()))?;

        let path = dir.join(ARTIFACTS_FILE);
        let mut artifacts = Self::read_file(&path).await?;
        debug!("Recording {} artifact of session {}", descriptor.kind, session_id);
        artifacts.push(descriptor);

        let content = serde_json::to_string_pretty(&artifacts)?;
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        info!("Recorded artifact for session {} in {}", session_id, path.display());
        Ok(())
    }
}

/// In-memory store for tests and dry runs
#[derive(Default)]
pub struct MemoryEvidenceStore {
    records: Mutex<Vec<ArtifactDescriptor>>,
}

impl MemoryEvidenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn artifacts(&self) -> Vec<ArtifactDescriptor> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EvidenceStore for MemoryEvidenceStore {
    async fn record_artifact(&self, _session_id: Uuid, descriptor: ArtifactDescriptor) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| anyhow::anyhow!("evidence record lock poisoned"))?
            .push(descriptor);
        Ok(())
    }
}
