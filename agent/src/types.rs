// File: agent/src/types.rs
use serde::{Deserialize, Serialize};
use std::fmt;

// === REQUEST STRUCTURES ===

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
pub struct LaunchRequest {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: String,
}

// === RESPONSE STRUCTURES ===

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success_with_data(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

impl ApiResponse<()> {
    pub fn success() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TokenData {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct RemovedData {
    pub removed: bool,
}

#[derive(Debug, Serialize)]
pub struct SizeData {
    pub size: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct HandleData {
    pub handle: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessStatusData {
    pub running: bool,
    pub exit_code: Option<i32>,
}
