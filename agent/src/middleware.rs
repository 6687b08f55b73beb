//! Middleware for the agent server
//!
//! Provides authentication and other cross-cutting concerns.

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use std::sync::Arc;

use crate::AppState;

/// Extractor that validates the channel token from the Authorization header.
///
/// # Example
/// ```ignore
/// async fn my_handler(
///     auth: TokenAuth,  // This validates the channel token
///     State(state): State<Arc<AppState>>,
/// ) -> Result<ResponseJson<ApiResponse<()>>, StatusCode> {
///     // Handler logic here - token is already validated
/// }
/// ```
pub struct TokenAuth {
    pub username: String,
    token: String,
}

impl TokenAuth {
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl FromRequestParts<Arc<AppState>> for TokenAuth {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .ok_or(StatusCode::UNAUTHORIZED)?;

        match state.tokens.validate(token).await {
            Some(username) => Ok(TokenAuth {
                username,
                token: token.to_string(),
            }),
            None => Err(StatusCode::UNAUTHORIZED),
        }
    }
}
