//! HTTP request handlers for the agent server

use axum::{
    body::Bytes,
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::Json as ResponseJson,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::middleware::TokenAuth;
use crate::services::files;
use crate::types::*;
use crate::AppState;

type HandlerResult<T> = Result<ResponseJson<ApiResponse<T>>, (StatusCode, ResponseJson<ApiResponse<()>>)>;

fn not_found(message: String) -> (StatusCode, ResponseJson<ApiResponse<()>>) {
    (StatusCode::NOT_FOUND, ResponseJson(ApiResponse::error(message)))
}

// === Channel handlers ===

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> HandlerResult<TokenData> {
    match state.tokens.login(&request.username, &request.password).await {
        Some(token) => Ok(ResponseJson(ApiResponse::success_with_data(TokenData { token }))),
        None => Err((
            StatusCode::UNAUTHORIZED,
            ResponseJson(ApiResponse::error("Invalid credentials".to_string())),
        )),
    }
}

pub async fn ping(_auth: TokenAuth) -> HandlerResult<()> {
    Ok(ResponseJson(ApiResponse::success()))
}

pub async fn logout(auth: TokenAuth, State(state): State<Arc<AppState>>) -> HandlerResult<()> {
    state.tokens.logout(auth.token()).await;
    Ok(ResponseJson(ApiResponse::success()))
}

// === File handlers ===

pub async fn put_file(
    auth: TokenAuth,
    Query(query): Query<PathQuery>,
    body: Bytes,
) -> HandlerResult<()> {
    info!("{} uploading {} bytes to {}", auth.username, body.len(), query.path);
    match files::write_file(&query.path, &body).await {
        Ok(()) => Ok(ResponseJson(ApiResponse::success())),
        Err(e) => Ok(ResponseJson(ApiResponse::error(e.to_string()))),
    }
}

pub async fn delete_file(
    _auth: TokenAuth,
    Query(query): Query<PathQuery>,
) -> HandlerResult<RemovedData> {
    match files::remove_file(&query.path).await {
        Ok(removed) => Ok(ResponseJson(ApiResponse::success_with_data(RemovedData { removed }))),
        Err(e) => Ok(ResponseJson(ApiResponse::error(e.to_string()))),
    }
}

pub async fn get_file_size(
    _auth: TokenAuth,
    Query(query): Query<PathQuery>,
) -> HandlerResult<SizeData> {
    match files::file_size(&query.path).await {
        Ok(size) => Ok(ResponseJson(ApiResponse::success_with_data(SizeData { size }))),
        Err(e) => Ok(ResponseJson(ApiResponse::error(e.to_string()))),
    }
}

// === Process handlers ===

pub async fn launch_process(
    auth: TokenAuth,
    State(state): State<Arc<AppState>>,
    Json(request): Json<LaunchRequest>,
) -> HandlerResult<HandleData> {
    info!("{} launching {} {:?}", auth.username, request.command, request.args);
    match state.processes.launch(&request.command, &request.args).await {
        Ok(handle) => Ok(ResponseJson(ApiResponse::success_with_data(HandleData { handle }))),
        Err(e) => {
            warn!("Launch failed: {}", e);
            Ok(ResponseJson(ApiResponse::error(e.to_string())))
        }
    }
}

pub async fn get_process_status(
    _auth: TokenAuth,
    Path(handle): Path<String>,
    State(state): State<Arc<AppState>>,
) -> HandlerResult<ProcessStatusData> {
    match state.processes.status(&handle).await {
        Some(status) => Ok(ResponseJson(ApiResponse::success_with_data(status))),
        None => Err(not_found(format!("Unknown process handle {}", handle))),
    }
}

pub async fn terminate_process(
    _auth: TokenAuth,
    Path(handle): Path<String>,
    State(state): State<Arc<AppState>>,
) -> HandlerResult<()> {
    match state.processes.terminate(&handle).await {
        Ok(()) => Ok(ResponseJson(ApiResponse::success())),
        Err(e) => Ok(ResponseJson(ApiResponse::error(e.to_string()))),
    }
}
