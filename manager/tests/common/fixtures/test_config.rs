//! Test configuration builders: in-memory `Config` values and on-disk config directories

use forensic_manager::config::{Config, ToolConfig};
use forensic_manager::target::Target;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use super::test_data::remote;

/// Builder for `Config` values with short timings for session tests
pub struct TestConfigBuilder {
    config: Config,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = Config::default();

        config.connection.attempts = 3;
        config.connection.backoff_base_ms = 100;
        config.connection.backoff_max_ms = 400;
        config.connection.timeout_seconds = 5;

        config.deployment.health_check_attempts = 10;
        config.deployment.health_check_interval_ms = 500;
        config.deployment.health_check_timeout_seconds = 15;
        config.deployment.remote_work_dir = remote::WORK_DIR.to_string();
        config.deployment.copy_attempts = 3;
        config.deployment.copy_backoff_base_ms = 100;
        config.deployment.copy_backoff_max_ms = 400;

        config.progress.poll_interval_seconds = 1;
        config.progress.stall_threshold = 3;

        config.cleanup.teardown_attempts = 3;
        config.cleanup.retry_delay_ms = 50;

        config.tools.file_browser = Some(file_browser_tool());
        config.tools.memory_imager = Some(memory_imager_tool());

        Self { config }
    }

    pub fn with_max_sessions(mut self, limit: usize) -> Self {
        self.config.limits.max_concurrent_sessions = Some(limit);
        self
    }

    pub fn with_connection_attempts(mut self, attempts: u32) -> Self {
        self.config.connection.attempts = attempts;
        self
    }

    pub fn with_target(mut self, name: &str, target: Target) -> Self {
        self.config.targets.insert(name.to_string(), target);
        self
    }

    pub fn without_memory_imager(mut self) -> Self {
        self.config.tools.memory_imager = None;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn file_browser_tool() -> ToolConfig {
    ToolConfig {
        binary: PathBuf::from("tools/filebrowser.exe"),
        remote_name: "filebrowser.exe".to_string(),
        args: vec![
            "--port".to_string(),
            "{port}".to_string(),
            "--database".to_string(),
            "{work_dir}\\filebrowser.db".to_string(),
        ],
        port: Some(remote::FILE_BROWSER_PORT),
        output_path: None,
        expected_bytes: None,
        extra_cleanup_paths: vec!["{work_dir}\\filebrowser.db".to_string()],
    }
}

pub fn memory_imager_tool() -> ToolConfig {
    ToolConfig {
        binary: PathBuf::from("tools/winpmem.exe"),
        remote_name: "winpmem.exe".to_string(),
        args: vec!["--output".to_string(), "{output}".to_string()],
        port: None,
        output_path: Some("{work_dir}\\memory.raw".to_string()),
        expected_bytes: Some(remote::MEMORY_IMAGE_BYTES),
        extra_cleanup_paths: vec![],
    }
}

/// Writes a config directory the way an operator would lay it out
pub struct ConfigDirBuilder {
    temp_dir: TempDir,
    main_toml: String,
    files: Vec<(String, String)>,
}

impl ConfigDirBuilder {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp dir"),
            main_toml: String::new(),
            files: Vec::new(),
        }
    }

    pub fn main(mut self, content: &str) -> Self {
        self.main_toml = content.to_string();
        self
    }

    pub fn file(mut self, name: &str, content: &str) -> Self {
        self.files.push((name.to_string(), content.to_string()));
        self
    }

    pub fn target(self, name: &str, address: &str, agent_port: u16) -> Self {
        let content = format!(
            "[target]\naddress = \"{}\"\nagent_port = {}\n",
            address, agent_port
        );
        self.file(&format!("{}.toml", name), &content)
    }

    /// Write the files; the returned directory lives as long as the `TempDir`
    pub fn build(self) -> (TempDir, PathBuf) {
        let config_dir = self.temp_dir.path().join("config");
        fs::create_dir_all(&config_dir).expect("Failed to create config dir");
        fs::write(config_dir.join("main.toml"), &self.main_toml).expect("Failed to write main.toml");
        for (name, content) in &self.files {
            fs::write(config_dir.join(name), content).expect("Failed to write config file");
        }
        (self.temp_dir, config_dir)
    }
}

impl Default for ConfigDirBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn config_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(name)
}
