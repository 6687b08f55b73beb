// File: agent/src/services/auth.rs
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// The single account allowed to open channels on this host
#[derive(Clone)]
pub struct AdminCredential {
    pub username: String,
    password: String,
}

impl AdminCredential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn matches(&self, username: &str, password: &str) -> bool {
        // Both comparisons always run
        let user_ok = constant_time_eq(self.username.as_bytes(), username.as_bytes());
        let password_ok = constant_time_eq(self.password.as_bytes(), password.as_bytes());
        user_ok & password_ok
    }
}

impl fmt::Debug for AdminCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminCredential")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Compare without early exit on the first differing byte
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[derive(Debug, Clone)]
struct TokenInfo {
    username: String,
    last_used: DateTime<Utc>,
}

#[derive(Clone)]
pub struct TokenStore {
    admin: AdminCredential,
    tokens: Arc<RwLock<HashMap<String, TokenInfo>>>,
    ttl: Duration,
}

impl TokenStore {
    pub fn new(admin: AdminCredential, ttl: Duration) -> Self {
        Self {
            admin,
            tokens: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Issue a channel token, or `None` when the credential is rejected
    pub async fn login(&self, username: &str, password: &str) -> Option<String> {
        if !self.admin.matches(username, password) {
            warn!("Rejected login attempt for user {}", username);
            return None;
        }

        let token = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
        self.tokens.write().await.insert(
            token.clone(),
            TokenInfo {
                username: username.to_string(),
                last_used: Utc::now(),
            },
        );
        info!("Channel opened for user {}", username);
        Some(token)
    }

    /// Validate a token and refresh its idle timer
    pub async fn validate(&self, token: &str) -> Option<String> {
        let mut tokens = self.tokens.write().await;
        let now = Utc::now();
        let info = tokens.get_mut(token)?;
        if now - info.last_used > self.ttl {
            tokens.remove(token);
            return None;
        }
        info.last_used = now;
        Some(info.username.clone())
    }

    /// Returns whether the token was still known
    pub async fn logout(&self, token: &str) -> bool {
        let removed = self.tokens.write().await.remove(token);
        if let Some(info) = &removed {
            info!("Channel closed for user {}", info.username);
        }
        removed.is_some()
    }

    pub async fn sweep_expired(&self) -> usize {
        let mut tokens = self.tokens.write().await;
        let cutoff = Utc::now() - self.ttl;
        let before = tokens.len();
        tokens.retain(|_, info| info.last_used > cutoff);
        let swept = before - tokens.len();
        if swept > 0 {
            info!("Expired {} idle channel tokens", swept);
        }
        swept
    }

    pub async fn active_count(&self) -> usize {
        self.tokens.read().await.len()
    }
}
