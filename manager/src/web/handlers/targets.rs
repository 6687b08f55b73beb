// Target lock inspection and operator override

use axum::{
    extract::{Path, State},
    response::Json,
};
use tracing::{info, warn};

use super::common::{error_response, ApiResponse, ApiResult};
use crate::registry::{ActiveSession, RegistryStatus};
use crate::web::AppState;

pub async fn get_active_targets(State(state): State<AppState>) -> ApiResult<RegistryStatus> {
    Ok(Json(ApiResponse::success(
        state.service.active_targets().await,
    )))
}

/// Unlock a target whose session left residual state behind
pub async fn force_release_target(
    Path(address): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<ActiveSession> {
    warn!("Force release requested for {}", address);

    match state.service.force_release(&address).await {
        Ok(released) => {
            info!(
                "Released {} (session {})",
                address, released.session_id
            );
            Ok(Json(ApiResponse::success(released)))
        }
        Err(e) => Err(error_response(e)),
    }
}
