// Common types and utilities for API handlers

use axum::{http::StatusCode, response::Json};
use chrono::Utc;
use serde::Serialize;

use crate::errors::{AcquisitionError, ErrorKind};

// Helper type for API responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, (StatusCode, Json<ApiResponse<()>>)>;

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            error_kind: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl ApiResponse<()> {
    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            error_kind: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

pub fn status_for(error: &AcquisitionError) -> StatusCode {
    match error.kind() {
        ErrorKind::DuplicateSession | ErrorKind::InvalidTransition => StatusCode::CONFLICT,
        ErrorKind::SessionLimitReached => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::SessionNotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
        ErrorKind::Authentication => StatusCode::UNAUTHORIZED,
        ErrorKind::NetworkUnreachable => StatusCode::BAD_GATEWAY,
        ErrorKind::TimeoutExceeded => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn error_response(error: AcquisitionError) -> (StatusCode, Json<ApiResponse<()>>) {
    let mut body = ApiResponse::error(error.to_string());
    body.error_kind = Some(error.kind());
    (status_for(&error), Json(body))
}
