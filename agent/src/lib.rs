//! Forensic agent: the remote execution helper a manager talks to on a target

pub mod handlers;
pub mod middleware;
pub mod services;
pub mod types;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use services::{ProcessManager, TokenStore};

/// Helper binaries are uploaded whole
const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

// Application state
pub struct AppState {
    pub tokens: TokenStore,
    pub processes: ProcessManager,
}

impl AppState {
    pub fn new(tokens: TokenStore) -> Self {
        Self {
            tokens,
            processes: ProcessManager::new(),
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/auth/login", post(handlers::login))
        .route("/auth/ping", get(handlers::ping))
        .route("/auth/logout", post(handlers::logout))
        .route(
            "/files",
            axum::routing::put(handlers::put_file).delete(handlers::delete_file),
        )
        .route("/files/size", get(handlers::get_file_size))
        .route("/process/launch", post(handlers::launch_process))
        .route("/process/{handle}", get(handlers::get_process_status))
        .route(
            "/process/{handle}/terminate",
            post(handlers::terminate_process),
        )
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
