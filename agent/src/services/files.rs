// File: agent/src/services/files.rs
use anyhow::{anyhow, Context, Result};
use std::io::ErrorKind;
use std::path::{Component, Path};
use tokio::fs;
use tracing::{debug, info};

/// Reject empty paths and any `..` traversal
fn checked_path(path: &str) -> Result<&Path> {
    if path.trim().is_empty() {
        return Err(anyhow!("Path is empty"));
    }
    let path = Path::new(path);
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(anyhow!("Path must not contain '..': {}", path.display()));
    }
    Ok(path)
}

pub async fn write_file(path: &str, bytes: &[u8]) -> Result<()> {
    let path = checked_path(path)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

/// Returns whether the file existed
pub async fn remove_file(path: &str) -> Result<bool> {
    let path = checked_path(path)?;
    match fs::remove_file(path).await {
        Ok(()) => {
            info!("Removed {}", path.display());
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("{} already absent", path.display());
            Ok(false)
        }
        Err(e) => Err(anyhow!("Failed to remove {}: {}", path.display(), e)),
    }
}

pub async fn file_size(path: &str) -> Result<Option<u64>> {
    let path = checked_path(path)?;
    match fs::metadata(path).await {
        Ok(metadata) => Ok(Some(metadata.len())),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(anyhow!("Failed to stat {}: {}", path.display(), e)),
    }
}
