//! Transient helper services on a target
//!
//! A deployment is copy, launch, health check. Each step can fail on its own;
//! whatever was created up to the failure is handed back to the caller so it
//! can be torn down.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::config::{DeploymentSettings, ToolConfig};
use crate::connection::Connection;
use crate::errors::{AcquisitionError, RemoteError};
use crate::progress::ProgressUpdate;
use crate::remote::{ProcessHandle, RemoteExecutor};
use crate::retry::{retry_with_backoff, RetryError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HelperKind {
    FileBrowser,
    MemoryImager,
    ProcessDumper,
}

impl HelperKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HelperKind::FileBrowser => "file_browser",
            HelperKind::MemoryImager => "memory_imager",
            HelperKind::ProcessDumper => "process_dumper",
        }
    }

    /// Acquisition tools produce an output file and finish on their own
    pub fn is_acquisition_tool(&self) -> bool {
        !matches!(self, HelperKind::FileBrowser)
    }
}

impl fmt::Display for HelperKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One helper instance on a target
#[derive(Debug, Clone, Serialize)]
pub struct Deployment {
    pub id: Uuid,
    pub kind: HelperKind,
    pub remote_path: String,
    pub port: Option<u16>,
    pub handle: Option<ProcessHandle>,
    pub output_path: Option<String>,
    pub expected_bytes: Option<u64>,
    pub extra_cleanup_paths: Vec<String>,
    pub deployed_at: DateTime<Utc>,
    pub healthy: bool,
    /// Set before the binary copy starts, cleared only by a complete teardown
    pub cleanup_required: bool,
    pub last_progress: Option<ProgressUpdate>,
    #[serde(skip)]
    process_stopped: bool,
    #[serde(skip)]
    removed_paths: Vec<String>,
}

impl Deployment {
    fn new(kind: HelperKind, remote_path: String, tool: &ToolConfig, work_dir: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            remote_path,
            port: tool.port,
            handle: None,
            output_path: tool
                .output_path
                .as_deref()
                .map(|p| expand(p, tool.port, None, work_dir)),
            expected_bytes: tool.expected_bytes,
            extra_cleanup_paths: tool
                .extra_cleanup_paths
                .iter()
                .map(|p| expand(p, tool.port, None, work_dir))
                .collect(),
            deployed_at: Utc::now(),
            healthy: false,
            cleanup_required: true,
            last_progress: None,
            process_stopped: false,
            removed_paths: Vec::new(),
        }
    }

    /// Remote files owned by this deployment, binary first
    pub fn artifact_paths(&self) -> impl Iterator<Item = &String> {
        std::iter::once(&self.remote_path).chain(self.extra_cleanup_paths.iter())
    }

    /// Short label used in cleanup reports
    pub fn label(&self) -> String {
        match self.port {
            Some(port) => format!("{} on port {}", self.kind, port),
            None => format!("{} ({})", self.kind, self.remote_path),
        }
    }
}

/// A failed deployment together with whatever it left on the target
#[derive(Debug)]
pub struct DeployFailure {
    pub error: AcquisitionError,
    pub partial: Option<Deployment>,
}

impl DeployFailure {
    fn new(error: AcquisitionError, partial: Deployment) -> Self {
        Self {
            error,
            partial: Some(partial),
        }
    }
}

fn expand(template: &str, port: Option<u16>, output: Option<&str>, work_dir: &str) -> String {
    let mut value = template.replace("{work_dir}", work_dir);
    if let Some(port) = port {
        value = value.replace("{port}", &port.to_string());
    }
    if let Some(output) = output {
        value = value.replace("{output}", output);
    }
    value
}

fn join_remote(dir: &str, name: &str) -> String {
    if dir.ends_with('\\') || dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else if dir.contains('\\') {
        format!("{}\\{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

enum HealthOutcome {
    Healthy,
    Exited(i32),
    Exhausted,
    Cancelled,
}

pub struct ServiceDeployer {
    executor: Arc<dyn RemoteExecutor>,
    settings: DeploymentSettings,
}

impl ServiceDeployer {
    pub fn new(executor: Arc<dyn RemoteExecutor>, settings: DeploymentSettings) -> Self {
        Self { executor, settings }
    }

    /// Copy, start and health check one helper
    ///
    /// A `Deployment` is only returned once its health check passed.
    #[instrument(skip(self, connection, tool, cancel), fields(target = %connection.target().address))]
    pub async fn deploy(
        &self,
        connection: &Connection,
        kind: HelperKind,
        tool: &ToolConfig,
        cancel: &CancelToken,
    ) -> Result<Deployment, DeployFailure> {
        let work_dir = self.settings.remote_work_dir.as_str();

        let uses_port = tool.args.iter().any(|a| a.contains("{port}"));
        let uses_output = tool.args.iter().any(|a| a.contains("{output}"));
        if (uses_port && tool.port.is_none()) || (uses_output && tool.output_path.is_none()) {
            return Err(DeployFailure {
                error: AcquisitionError::Configuration(format!(
                    "argument template of {} references an unset port or output path",
                    kind
                )),
                partial: None,
            });
        }

        let remote_path = join_remote(work_dir, &tool.remote_name);
        let mut deployment = Deployment::new(kind, remote_path, tool, work_dir);
        let args: Vec<String> = tool
            .args
            .iter()
            .map(|a| expand(a, tool.port, deployment.output_path.as_deref(), work_dir))
            .collect();
        let channel = connection.channel();

        // 1. copy
        debug!("Copying {} to {}", tool.binary.display(), deployment.remote_path);
        let copied = {
            let executor = &self.executor;
            let local = tool.binary.as_path();
            let remote_path = deployment.remote_path.as_str();

            let attempts = retry_with_backoff(
                self.settings.copy_retry_policy(),
                cancel,
                |attempt| async move {
                    if attempt > 1 {
                        debug!("Copy attempt {} of {}", attempt, remote_path);
                    }
                    executor.copy_file(channel, local, remote_path).await
                },
                RemoteError::is_transient,
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(AcquisitionError::UserCancelled),
                result = attempts => match result {
                    Ok(()) => Ok(()),
                    Err(RetryError::Permanent(e)) => Err(e.into_deploy_error(kind, "copy")),
                    Err(RetryError::Exhausted { error, attempts }) => {
                        warn!("Giving up on copying {} after {} attempts", kind, attempts);
                        Err(error.into_deploy_error(kind, "copy"))
                    }
                    Err(RetryError::Cancelled) => Err(AcquisitionError::UserCancelled),
                },
            }
        };
        if let Err(error) = copied {
            return Err(DeployFailure::new(error, deployment));
        }

        // 2. launch; never abandoned half way so the handle is always known
        match self
            .executor
            .launch(channel, &deployment.remote_path, &args)
            .await
        {
            Ok(handle) => deployment.handle = Some(handle),
            Err(e) => return Err(DeployFailure::new(e.into_deploy_error(kind, "launch"), deployment)),
        }

        // 3. health check
        let started = Instant::now();
        let outcome = timeout(
            self.settings.health_check_timeout(),
            self.health_check(connection, &deployment, cancel),
        )
        .await;

        let error = match outcome {
            Ok(HealthOutcome::Healthy) => {
                deployment.healthy = true;
                info!("Deployed {} on {}", deployment.label(), connection.target().address);
                return Ok(deployment);
            }
            Ok(HealthOutcome::Exited(code)) => AcquisitionError::DeploymentFailure {
                kind,
                reason: format!("helper exited with code {} during start-up", code),
            },
            Ok(HealthOutcome::Exhausted) => AcquisitionError::DeploymentFailure {
                kind,
                reason: format!(
                    "health check failed after {} attempts",
                    self.settings.health_check_attempts
                ),
            },
            Ok(HealthOutcome::Cancelled) => AcquisitionError::UserCancelled,
            Err(_) => AcquisitionError::timeout(format!("health check of {}", kind), started.elapsed()),
        };

        warn!("Deployment of {} failed: {}", kind, error);
        Err(DeployFailure::new(error, deployment))
    }

    async fn health_check(
        &self,
        connection: &Connection,
        deployment: &Deployment,
        cancel: &CancelToken,
    ) -> HealthOutcome {
        let channel = connection.channel();
        let attempts = self.settings.health_check_attempts.max(1);

        for attempt in 1..=attempts {
            let status = match &deployment.handle {
                Some(handle) => self.executor.status(channel, handle).await.ok(),
                None => None,
            };

            if let Some(status) = status {
                if let Some(code) = status.exit_code.filter(|code| *code != 0) {
                    return HealthOutcome::Exited(code);
                }
            }

            let healthy = match deployment.port {
                Some(port) => match self.executor.probe(connection.target(), port).await {
                    Ok(responsive) => responsive,
                    Err(e) => {
                        debug!("Probe of port {} failed: {}", port, e);
                        false
                    }
                },
                None => status.map(|s| s.running || s.exited_successfully()).unwrap_or(false),
            };

            if healthy {
                debug!("{} healthy after {} attempt(s)", deployment.kind, attempt);
                return HealthOutcome::Healthy;
            }

            if attempt < attempts {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return HealthOutcome::Cancelled,
                    _ = sleep(self.settings.health_check_interval()) => {}
                }
            }
        }

        HealthOutcome::Exhausted
    }

    /// Stop the helper and delete everything it left on the target
    ///
    /// Safe to call repeatedly: finished sub-steps are remembered and skipped,
    /// and a fully torn down deployment is left untouched.
    pub async fn teardown(
        &self,
        connection: &Connection,
        deployment: &mut Deployment,
    ) -> Result<(), RemoteError> {
        if !deployment.cleanup_required {
            return Ok(());
        }

        let channel = connection.channel();
        let mut first_error = None;

        if !deployment.process_stopped {
            match &deployment.handle {
                None => deployment.process_stopped = true,
                Some(handle) => match self.executor.terminate(channel, handle).await {
                    Ok(()) => deployment.process_stopped = true,
                    Err(e) => {
                        warn!("Failed to stop {}: {}", deployment.label(), e);
                        first_error = Some(e);
                    }
                },
            }
        }

        let pending: Vec<String> = deployment
            .artifact_paths()
            .filter(|p| !deployment.removed_paths.contains(*p))
            .cloned()
            .collect();

        for path in pending {
            match self.executor.remove_file(channel, &path).await {
                Ok(removed) => {
                    debug!("Removed {} (existed: {})", path, removed);
                    deployment.removed_paths.push(path);
                }
                Err(e) => {
                    warn!("Failed to remove {}: {}", path, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                deployment.cleanup_required = false;
                deployment.healthy = false;
                info!("Tore down {}", deployment.label());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::StopReason;
    use crate::config::ConnectionSettings;
    use crate::connection::ConnectionManager;
    use crate::constants::deployment;
    use crate::credential::Credential;
    use crate::remote::FakeRemote;
    use crate::target::Target;
    use std::path::PathBuf;
    use std::time::Duration;

    fn file_browser() -> ToolConfig {
        ToolConfig {
            binary: PathBuf::from("bin/filebrowser.exe"),
            remote_name: "fb.exe".to_string(),
            args: vec!["--port".to_string(), "{port}".to_string()],
            port: Some(8080),
            output_path: None,
            expected_bytes: None,
            extra_cleanup_paths: vec!["{work_dir}\\filebrowser.db".to_string()],
        }
    }

    async fn connect(fake: &FakeRemote) -> (ConnectionManager, Connection) {
        let manager = ConnectionManager::new(Arc::new(fake.clone()), &ConnectionSettings::default());
        let connection = manager
            .connect(
                &Target::new("10.0.0.5"),
                Credential::new("admin", "pw"),
                Duration::from_secs(30),
                &CancelToken::new(),
            )
            .await
            .unwrap();
        (manager, connection)
    }

    fn deployer(fake: &FakeRemote) -> ServiceDeployer {
        ServiceDeployer::new(Arc::new(fake.clone()), DeploymentSettings::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_deploy_file_browser() {
        let fake = FakeRemote::new().with_credential("admin", "pw");
        let (_, connection) = connect(&fake).await;

        let deployment = deployer(&fake)
            .deploy(&connection, HelperKind::FileBrowser, &file_browser(), &CancelToken::new())
            .await
            .unwrap();

        assert!(deployment.healthy);
        assert!(deployment.cleanup_required);
        assert_eq!(deployment.port, Some(8080));
        assert_eq!(deployment.remote_path, "C:\\Windows\\Temp\\acquisition\\fb.exe");
        assert_eq!(
            deployment.extra_cleanup_paths,
            vec!["C:\\Windows\\Temp\\acquisition\\filebrowser.db".to_string()]
        );

        let launched = fake.launched_processes();
        assert_eq!(launched.len(), 1);
        assert_eq!(launched[0].args, vec!["--port".to_string(), "8080".to_string()]);
    }

    fn copy_calls(fake: &FakeRemote) -> usize {
        fake.calls().iter().filter(|c| c.starts_with("copy_file")).count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_connection_during_copy_is_retried() {
        let fake = FakeRemote::new()
            .with_credential("admin", "pw")
            .with_failing_copies(1);
        let (_, connection) = connect(&fake).await;

        let result = deployer(&fake)
            .deploy(&connection, HelperKind::FileBrowser, &file_browser(), &CancelToken::new())
            .await;

        assert!(result.is_ok());
        assert_eq!(copy_calls(&fake), 2);
        assert_eq!(fake.launched_processes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_copy_gives_up_after_configured_attempts() {
        let fake = FakeRemote::new()
            .with_credential("admin", "pw")
            .with_failing_copies(10);
        let (_, connection) = connect(&fake).await;

        let failure = deployer(&fake)
            .deploy(&connection, HelperKind::FileBrowser, &file_browser(), &CancelToken::new())
            .await
            .unwrap_err();

        assert!(failure.error.to_string().contains("copy failed: unreachable"));
        assert_eq!(copy_calls(&fake), deployment::COPY_ATTEMPTS as usize);
        assert!(failure.partial.unwrap().cleanup_required);
        assert!(fake.launched_processes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_copy_is_not_retried() {
        let fake = FakeRemote::new().with_credential("admin", "pw");
        let (manager, mut connection) = connect(&fake).await;
        // A closed channel makes every call unauthorized
        manager.disconnect(&mut connection).await.unwrap();

        let started = Instant::now();
        let failure = deployer(&fake)
            .deploy(&connection, HelperKind::FileBrowser, &file_browser(), &CancelToken::new())
            .await
            .unwrap_err();

        assert!(failure.error.to_string().contains("unauthorized"));
        // No backoff was waited out
        assert!(started.elapsed() < Duration::from_millis(deployment::COPY_BACKOFF_BASE_MS));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_port_fails_with_partial() {
        let fake = FakeRemote::new()
            .with_credential("admin", "pw")
            .with_unresponsive_port(8080);
        let (_, connection) = connect(&fake).await;

        let failure = deployer(&fake)
            .deploy(&connection, HelperKind::FileBrowser, &file_browser(), &CancelToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            failure.error,
            AcquisitionError::DeploymentFailure { kind: HelperKind::FileBrowser, .. }
        ));
        let partial = failure.partial.unwrap();
        assert!(partial.cleanup_required);
        assert!(!partial.healthy);
        assert!(partial.handle.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_nonzero_exit_fails_fast() {
        let fake = FakeRemote::new()
            .with_credential("admin", "pw")
            .exiting_on_launch("winpmem", 3);
        let (_, connection) = connect(&fake).await;

        let tool = ToolConfig {
            binary: PathBuf::from("bin/winpmem.exe"),
            remote_name: "winpmem.exe".to_string(),
            args: vec!["{output}".to_string()],
            port: None,
            output_path: Some("{work_dir}\\memory.raw".to_string()),
            expected_bytes: Some(1 << 30),
            extra_cleanup_paths: vec![],
        };

        let failure = deployer(&fake)
            .deploy(&connection, HelperKind::MemoryImager, &tool, &CancelToken::new())
            .await
            .unwrap_err();

        assert!(failure.error.to_string().contains("exited with code 3"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_copy_keeps_cleanup_flag() {
        let fake = FakeRemote::new()
            .with_credential("admin", "pw")
            .hanging_copy();
        let (_, connection) = connect(&fake).await;
        let cancel = CancelToken::new();
        let trigger = cancel.clone();

        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            trigger.request(StopReason::Cancelled);
        });

        let failure = deployer(&fake)
            .deploy(&connection, HelperKind::FileBrowser, &file_browser(), &cancel)
            .await
            .unwrap_err();

        assert_eq!(failure.error, AcquisitionError::UserCancelled);
        let partial = failure.partial.unwrap();
        assert!(partial.cleanup_required);
        assert!(partial.handle.is_none());
        // The partially copied binary is on the target until teardown runs
        assert!(fake.has_file(&partial.remote_path));
        assert!(fake.launched_processes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_twice_is_a_noop() {
        let fake = FakeRemote::new().with_credential("admin", "pw");
        let (_, connection) = connect(&fake).await;
        let deployer = deployer(&fake);

        let mut deployment = deployer
            .deploy(&connection, HelperKind::FileBrowser, &file_browser(), &CancelToken::new())
            .await
            .unwrap();

        deployer.teardown(&connection, &mut deployment).await.unwrap();
        let calls_after_first = fake.calls().len();
        deployer.teardown(&connection, &mut deployment).await.unwrap();

        assert!(!deployment.cleanup_required);
        assert!(fake.running_processes().is_empty());
        assert!(!fake.has_file(&deployment.remote_path));
        assert_eq!(fake.calls().len(), calls_after_first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_skips_finished_substeps_on_retry() {
        let fake = FakeRemote::new()
            .with_credential("admin", "pw")
            .failing_remove("filebrowser.db");
        let (_, connection) = connect(&fake).await;
        let deployer = deployer(&fake);

        let mut deployment = deployer
            .deploy(&connection, HelperKind::FileBrowser, &file_browser(), &CancelToken::new())
            .await
            .unwrap();

        assert!(deployer.teardown(&connection, &mut deployment).await.is_err());
        assert!(deployment.cleanup_required);

        fake.heal();
        deployer.teardown(&connection, &mut deployment).await.unwrap();
        assert!(!deployment.cleanup_required);

        let terminates = fake
            .calls()
            .iter()
            .filter(|c| c.starts_with("terminate"))
            .count();
        let binary_removals = fake
            .calls()
            .iter()
            .filter(|c| c.ends_with("fb.exe") && c.starts_with("remove_file"))
            .count();
        assert_eq!(terminates, 1);
        assert_eq!(binary_removals, 1);
    }
}
