use crate::web::{handlers, AppState};
use anyhow::{Context, Result};
use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub async fn start_web_server(state: AppState) -> Result<()> {
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Server running on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // === SESSION ROUTES ===
        .route(
            "/api/sessions",
            get(handlers::list_sessions).post(handlers::request_session),
        )
        .route("/api/sessions/{session_id}", get(handlers::get_session))
        .route("/api/sessions/{session_id}/stop", post(handlers::stop_session))
        .route(
            "/api/sessions/{session_id}/cancel",
            post(handlers::cancel_session),
        )
        .route(
            "/api/sessions/{session_id}/cleanup",
            post(handlers::retry_cleanup),
        )
        // === TARGET LOCK ROUTES ===
        .route("/api/targets/active", get(handlers::get_active_targets))
        .route(
            "/api/targets/{address}/lock",
            delete(handlers::force_release_target),
        )
        // === EVENT STREAM ===
        .route("/api/events", get(handlers::session_events))
        // Add middleware
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
