pub mod manager;
pub mod secrets;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{cleanup, connection, deployment, limits, progress, server};
use crate::deployer::HelperKind;
use crate::retry::RetryPolicy;
use crate::target::Target;

pub use manager::ConfigManager;
pub use secrets::SecretsCredentialSource;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Root of the JSON-on-disk case folders
    #[serde(default = "default_evidence_dir")]
    pub evidence_dir: PathBuf,
    #[serde(default = "default_secrets_path")]
    pub secrets_path: PathBuf,
    #[serde(default)]
    pub connection: ConnectionSettings,
    #[serde(default)]
    pub deployment: DeploymentSettings,
    #[serde(default)]
    pub progress: ProgressSettings,
    #[serde(default)]
    pub cleanup: CleanupSettings,
    #[serde(default)]
    pub limits: LimitSettings,
    #[serde(default)]
    pub tools: ToolsConfig,
    // Populated from the per-target config files
    #[serde(skip)]
    pub targets: HashMap<String, Target>,
}

fn default_host() -> String {
    server::DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    server::DEFAULT_PORT
}

fn default_evidence_dir() -> PathBuf {
    PathBuf::from("evidence")
}

fn default_secrets_path() -> PathBuf {
    PathBuf::from("config/secrets.toml")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            evidence_dir: default_evidence_dir(),
            secrets_path: default_secrets_path(),
            connection: ConnectionSettings::default(),
            deployment: DeploymentSettings::default(),
            progress: ProgressSettings::default(),
            cleanup: CleanupSettings::default(),
            limits: LimitSettings::default(),
            tools: ToolsConfig::default(),
            targets: HashMap::new(),
        }
    }
}

impl Config {
    /// Known target by name or by address, falling back to an ad-hoc target
    pub fn resolve_target(&self, name_or_address: &str) -> Target {
        if let Some(target) = self.targets.get(name_or_address) {
            return target.clone();
        }
        let identity = name_or_address.trim().to_ascii_lowercase();
        self.targets
            .values()
            .find(|t| t.identity() == identity)
            .cloned()
            .unwrap_or_else(|| Target::new(name_or_address.trim()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub timeout_seconds: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            attempts: connection::ATTEMPTS,
            backoff_base_ms: connection::BACKOFF_BASE_MS,
            backoff_max_ms: connection::BACKOFF_MAX_MS,
            timeout_seconds: connection::TIMEOUT_SECONDS,
        }
    }
}

impl ConnectionSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.attempts,
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_max_ms),
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentSettings {
    pub health_check_attempts: u32,
    pub health_check_interval_ms: u64,
    pub health_check_timeout_seconds: u64,
    pub remote_work_dir: String,
    pub copy_attempts: u32,
    pub copy_backoff_base_ms: u64,
    pub copy_backoff_max_ms: u64,
}

impl Default for DeploymentSettings {
    fn default() -> Self {
        Self {
            health_check_attempts: deployment::HEALTH_CHECK_ATTEMPTS,
            health_check_interval_ms: deployment::HEALTH_CHECK_INTERVAL_MS,
            health_check_timeout_seconds: deployment::HEALTH_CHECK_TIMEOUT_SECONDS,
            remote_work_dir: deployment::REMOTE_WORK_DIR.to_string(),
            copy_attempts: deployment::COPY_ATTEMPTS,
            copy_backoff_base_ms: deployment::COPY_BACKOFF_BASE_MS,
            copy_backoff_max_ms: deployment::COPY_BACKOFF_MAX_MS,
        }
    }
}

impl DeploymentSettings {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_seconds)
    }

    pub fn copy_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.copy_attempts,
            Duration::from_millis(self.copy_backoff_base_ms),
            Duration::from_millis(self.copy_backoff_max_ms),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressSettings {
    pub poll_interval_seconds: u64,
    pub stall_threshold: u32,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self {
            poll_interval_seconds: progress::POLL_INTERVAL_SECONDS,
            stall_threshold: progress::STALL_THRESHOLD,
        }
    }
}

impl ProgressSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupSettings {
    pub teardown_attempts: u32,
    pub retry_delay_ms: u64,
    pub auto_retry_interval_seconds: u64,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            teardown_attempts: cleanup::TEARDOWN_ATTEMPTS,
            retry_delay_ms: cleanup::RETRY_DELAY_MS,
            auto_retry_interval_seconds: cleanup::AUTO_RETRY_INTERVAL_SECONDS,
        }
    }
}

impl CleanupSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.teardown_attempts, Duration::from_millis(self.retry_delay_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitSettings {
    /// No limit when absent
    pub max_concurrent_sessions: Option<usize>,
    pub event_channel_capacity: usize,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: None,
            event_channel_capacity: limits::EVENT_CHANNEL_CAPACITY,
        }
    }
}

/// Helper binaries, one optional section per kind
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    pub file_browser: Option<ToolConfig>,
    pub memory_imager: Option<ToolConfig>,
    pub process_dumper: Option<ToolConfig>,
}

impl ToolsConfig {
    pub fn get(&self, kind: HelperKind) -> Option<&ToolConfig> {
        match kind {
            HelperKind::FileBrowser => self.file_browser.as_ref(),
            HelperKind::MemoryImager => self.memory_imager.as_ref(),
            HelperKind::ProcessDumper => self.process_dumper.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Local path of the helper binary
    pub binary: PathBuf,
    /// File name on the target, inside the remote work directory
    pub remote_name: String,
    /// Argument template; `{port}`, `{output}` and `{work_dir}` are expanded
    #[serde(default)]
    pub args: Vec<String>,
    /// Port the helper listens on; port-less tools are health checked by process status
    pub port: Option<u16>,
    /// Remote file the tool writes its acquisition output to
    pub output_path: Option<String>,
    pub expected_bytes: Option<u64>,
    /// Remote files the helper creates besides its binary (databases, logs)
    #[serde(default)]
    pub extra_cleanup_paths: Vec<String>,
}

/// Per-target config file (`config/<name>.toml`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfigFile {
    pub target: Target,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert_eq!(config.port, server::DEFAULT_PORT);
        assert_eq!(config.connection.attempts, connection::ATTEMPTS);
        assert_eq!(config.deployment.health_check_attempts, 10);
        assert_eq!(config.deployment.health_check_interval_ms, 500);
        assert!(config.limits.max_concurrent_sessions.is_none());
        assert!(config.tools.get(HelperKind::FileBrowser).is_none());
    }

    #[test]
    fn test_partial_sections_keep_remaining_defaults() {
        let config: Config = toml::from_str(
            r#"
            [connection]
            attempts = 5

            [tools.file_browser]
            binary = "bin/filebrowser.exe"
            remote_name = "fb.exe"
            args = ["--port", "{port}", "--root", "C:\\"]
            port = 8080
            extra_cleanup_paths = ["{work_dir}\\filebrowser.db"]
            "#,
        )
        .unwrap();

        assert_eq!(config.connection.attempts, 5);
        assert_eq!(config.connection.backoff_base_ms, connection::BACKOFF_BASE_MS);

        let tool = config.tools.get(HelperKind::FileBrowser).unwrap();
        assert_eq!(tool.port, Some(8080));
        assert_eq!(tool.args.len(), 4);
        assert_eq!(tool.extra_cleanup_paths.len(), 1);
    }

    #[test]
    fn test_resolve_target_by_address() {
        let mut config = Config::default();
        config.targets.insert(
            "finance-ws".to_string(),
            Target::new("10.0.0.5").with_agent_port(9000),
        );

        assert_eq!(config.resolve_target("finance-ws").agent_port, 9000);
        assert_eq!(config.resolve_target("10.0.0.5").agent_port, 9000);
        assert_eq!(
            config.resolve_target("10.0.0.9").agent_port,
            connection::AGENT_PORT
        );
    }
}
