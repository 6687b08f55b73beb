// File: agent/src/main.rs
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use forensic_agent::services::{AdminCredential, TokenStore};
use forensic_agent::{build_router, AppState};

const DEFAULT_BIND: &str = "0.0.0.0:8745";
const DEFAULT_TOKEN_TTL_SECONDS: i64 = 3600;
const FINISHED_PROCESS_RETENTION_SECONDS: i64 = 3600;
const SWEEP_INTERVAL_SECONDS: u64 = 60;

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::from_default_env()
        .add_directive("forensic_agent=info".parse()?)
        .add_directive("tower_http=warn".parse()?);
    fmt().with_env_filter(env_filter).init();

    let bind = env_or("AGENT_BIND", DEFAULT_BIND);
    let username = std::env::var("AGENT_ADMIN_USER").context("AGENT_ADMIN_USER must be set")?;
    let password =
        std::env::var("AGENT_ADMIN_PASSWORD").context("AGENT_ADMIN_PASSWORD must be set")?;
    let ttl_seconds: i64 = env_or("AGENT_TOKEN_TTL_SECONDS", &DEFAULT_TOKEN_TTL_SECONDS.to_string())
        .parse()
        .context("AGENT_TOKEN_TTL_SECONDS must be a number")?;

    if password.len() < 12 {
        warn!("AGENT_ADMIN_PASSWORD is shorter than 12 characters");
    }

    let tokens = TokenStore::new(
        AdminCredential::new(username, password),
        chrono::Duration::seconds(ttl_seconds),
    );
    let state = Arc::new(AppState::new(tokens));

    // Expire idle tokens and forget finished processes
    let sweep_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECONDS));
        loop {
            interval.tick().await;
            sweep_state.tokens.sweep_expired().await;
            sweep_state
                .processes
                .sweep_finished(chrono::Duration::seconds(FINISHED_PROCESS_RETENTION_SECONDS))
                .await;
        }
    });

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("Forensic agent listening on {}", bind);

    axum::serve(listener, app).await?;
    Ok(())
}
