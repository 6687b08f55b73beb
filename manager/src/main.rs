// File: manager/src/main.rs
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use forensic_manager::config::ConfigManager;
use forensic_manager::errors::Severity;
use forensic_manager::evidence::JsonEvidenceStore;
use forensic_manager::remote::HttpRemoteExecutor;
use forensic_manager::services::{AcquisitionService, SessionContext};
use forensic_manager::web::{start_web_server, AppState};
use forensic_manager::SecretsCredentialSource;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with reduced verbosity
    let env_filter = EnvFilter::from_default_env()
        .add_directive("forensic_manager=info".parse()?)
        .add_directive("tower_http=warn".parse()?)
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?);

    fmt().with_env_filter(env_filter).init();

    info!("Starting Remote Acquisition Manager");

    // Load configuration
    let config_manager = ConfigManager::new("config").await?;
    let config = config_manager.get_current_config();
    info!(
        "Configuration loaded: {} targets, evidence stored under {}",
        config.targets.len(),
        config.evidence_dir.display()
    );

    let executor = Arc::new(HttpRemoteExecutor::new()?);
    let credentials = Arc::new(SecretsCredentialSource::new(config.secrets_path.clone()));
    let evidence = Arc::new(JsonEvidenceStore::new(config.evidence_dir.clone()));

    let service = AcquisitionService::new(SessionContext::new(
        config.clone(),
        executor,
        credentials,
        evidence,
    ));
    info!("Acquisition service initialized");

    // Log every state change; progress ticks stay at debug level
    let mut events = service.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) if event.is_progress() => {
                    tracing::debug!(
                        "Session {} progress: {:?}",
                        event.session_id,
                        event.progress
                    );
                }
                Ok(event) => match event.severity {
                    Severity::Info => info!(
                        "Session {} on {}: {} -> {}",
                        event.session_id, event.target, event.old_state, event.new_state
                    ),
                    Severity::Error => warn!(
                        "Session {} on {}: {} -> {} ({})",
                        event.session_id,
                        event.target,
                        event.old_state,
                        event.new_state,
                        event.error.as_deref().unwrap_or("no error recorded")
                    ),
                    Severity::ResidualState => error!(
                        "Session {} on {} left residual remote state ({})",
                        event.session_id,
                        event.target,
                        event.error.as_deref().unwrap_or("cleanup incomplete")
                    ),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event logger lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Periodically retry cleanup of sessions that left residual state behind
    let retry_service = service.clone();
    let retry_interval = config.cleanup.auto_retry_interval_seconds;
    if retry_interval > 0 {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(retry_interval));
            interval.tick().await;
            loop {
                interval.tick().await;
                let resolved = retry_service.retry_parked_cleanups().await;
                if resolved > 0 {
                    info!("Retried cleanup resolved {} session(s)", resolved);
                }
            }
        });
        info!("Cleanup retry task started with {}s interval", retry_interval);
    }

    // Start web server
    let state = AppState::new(config, service.clone());
    tokio::select! {
        result = start_web_server(state) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested, stopping running sessions");
            service.shutdown(SHUTDOWN_GRACE).await;
        }
    }

    Ok(())
}
