// Session command and query endpoints

use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use super::common::{error_response, ApiResponse, ApiResult};
use crate::cleanup::CleanupResult;
use crate::credential::CredentialInput;
use crate::services::SessionRequest;
use crate::session::SessionSnapshot;
use crate::web::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct RetryCleanupRequest {
    /// Needed only when the session's channel is already closed
    #[serde(default)]
    pub credential: Option<CredentialInput>,
}

/// Start a new acquisition session
pub async fn request_session(
    State(state): State<AppState>,
    Json(request): Json<SessionRequest>,
) -> ApiResult<Value> {
    info!(
        "Session requested for {} ({:?})",
        request.target, request.deployments
    );

    match state.service.request_session(request).await {
        Ok(session_id) => Ok(Json(ApiResponse::success(json!({
            "session_id": session_id,
        })))),
        Err(e) => {
            warn!("Session request rejected: {}", e);
            Err(error_response(e))
        }
    }
}

pub async fn list_sessions(State(state): State<AppState>) -> ApiResult<Vec<SessionSnapshot>> {
    Ok(Json(ApiResponse::success(state.service.list_sessions().await)))
}

pub async fn get_session(
    Path(session_id): Path<Uuid>,
    State(state): State<AppState>,
) -> ApiResult<SessionSnapshot> {
    state
        .service
        .get_session(session_id)
        .await
        .map(|snapshot| Json(ApiResponse::success(snapshot)))
        .map_err(error_response)
}

/// Orderly stop: tear everything down and end in CLEANED
pub async fn stop_session(
    Path(session_id): Path<Uuid>,
    State(state): State<AppState>,
) -> ApiResult<Value> {
    info!("Stop requested for session {}", session_id);

    match state.service.stop_session(session_id).await {
        Ok(()) => Ok(Json(ApiResponse::success(json!({
            "message": format!("Stop requested for session {}", session_id)
        })))),
        Err(e) => Err(error_response(e)),
    }
}

pub async fn cancel_session(
    Path(session_id): Path<Uuid>,
    State(state): State<AppState>,
) -> ApiResult<Value> {
    info!("Cancellation requested for session {}", session_id);

    match state.service.cancel_session(session_id).await {
        Ok(()) => Ok(Json(ApiResponse::success(json!({
            "message": format!("Cancellation requested for session {}", session_id)
        })))),
        Err(e) => Err(error_response(e)),
    }
}

/// Retry the teardown of a session that left residual remote state
pub async fn retry_cleanup(
    Path(session_id): Path<Uuid>,
    State(state): State<AppState>,
    Json(request): Json<RetryCleanupRequest>,
) -> ApiResult<CleanupResult> {
    info!("Cleanup retry requested for session {}", session_id);

    state
        .service
        .retry_cleanup(session_id, request.credential)
        .await
        .map(|result| Json(ApiResponse::success(result)))
        .map_err(error_response)
}
