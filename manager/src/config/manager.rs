use super::{Config, TargetConfigFile};
use anyhow::{anyhow, Context, Result};
use glob::glob;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};

/// Files in the config directory that are not target definitions
const RESERVED_FILES: &[&str] = &["main.toml", "secrets.toml"];

pub struct ConfigManager {
    current_config: Arc<Config>,
}

impl ConfigManager {
    pub async fn new(config_dir: impl AsRef<Path>) -> Result<Self> {
        let config = Self::load_configuration(config_dir.as_ref()).await?;
        Ok(Self {
            current_config: Arc::new(config),
        })
    }

    pub fn get_current_config(&self) -> Arc<Config> {
        self.current_config.clone()
    }

    async fn load_configuration(config_dir: &Path) -> Result<Config> {
        let main_config_path = config_dir.join("main.toml");
        let main_config_content = fs::read_to_string(&main_config_path)
            .await
            .with_context(|| format!("Failed to read main config {}", main_config_path.display()))?;

        let mut config: Config =
            toml::from_str(&main_config_content).context("Failed to parse main config")?;

        // Relative secrets paths are resolved against the config directory
        if config.secrets_path.is_relative() && !config.secrets_path.exists() {
            if let Some(file_name) = config.secrets_path.file_name() {
                config.secrets_path = config_dir.join(file_name);
            }
        }

        let pattern = format!("{}/*.toml", config_dir.display());
        let mut targets = HashMap::new();

        for entry in glob(&pattern).map_err(|e| anyhow!("Glob pattern error: {}", e))? {
            let path = entry.map_err(|e| anyhow!("Glob entry error: {}", e))?;
            let filename = path
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| anyhow!("Invalid filename"))?;

            if RESERVED_FILES.contains(&filename) {
                continue;
            }

            let target_name = filename
                .strip_suffix(".toml")
                .ok_or_else(|| anyhow!("Invalid config filename: {}", filename))?;

            debug!("Loading target config: {}", path.display());

            let content = fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;

            let target_file: TargetConfigFile = toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;

            targets.insert(target_name.to_string(), target_file.target);
        }

        config.targets = targets;

        let configured_tools = [
            config.tools.file_browser.is_some(),
            config.tools.memory_imager.is_some(),
            config.tools.process_dumper.is_some(),
        ]
        .iter()
        .filter(|configured| **configured)
        .count();

        info!(
            "Loaded {} known targets, {} helper tools",
            config.targets.len(),
            configured_tools
        );

        Ok(config)
    }
}
