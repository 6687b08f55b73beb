//! Credential material for the administrative channel
//!
//! A [`Credential`] lives only for the duration of one connection attempt. The
//! secret half overwrites its bytes when dropped and never prints itself.

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;

use crate::errors::AcquisitionError;

/// Secret string that zeroes its memory on drop
///
/// Deliberately has no `Display` and no `Serialize`.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    /// Expose the secret for the single call that needs it
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        // SAFETY: zero bytes keep the buffer valid UTF-8 and we own it exclusively
        unsafe {
            for byte in self.0.as_bytes_mut() {
                std::ptr::write_volatile(byte, 0);
            }
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(***)")
    }
}

/// Username and secret used to open an administrative channel
#[derive(Clone, Deserialize)]
pub struct Credential {
    pub username: String,
    #[serde(alias = "password")]
    pub secret: Secret,
}

impl Credential {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: Secret::new(secret),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("secret", &self.secret)
            .finish()
    }
}

/// How a session request supplies its credential
#[derive(Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialInput {
    Inline(Credential),
    /// Name of a profile in the secrets file, resolved right before connecting
    Profile(String),
}

impl fmt::Debug for CredentialInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialInput::Inline(credential) => write!(f, "Inline({:?})", credential),
            CredentialInput::Profile(name) => write!(f, "Profile({})", name),
        }
    }
}

/// Resolves named credential profiles on demand
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn resolve(&self, profile: &str) -> Result<Credential, AcquisitionError>;
}

impl CredentialInput {
    /// Turn the input into a usable credential; profile lookups happen here and nowhere earlier
    pub async fn resolve(self, source: &dyn CredentialSource) -> Result<Credential, AcquisitionError> {
        match self {
            CredentialInput::Inline(credential) => {
                if credential.username.trim().is_empty() {
                    return Err(AcquisitionError::InvalidRequest(
                        "credential username is empty".to_string(),
                    ));
                }
                Ok(credential)
            }
            CredentialInput::Profile(name) => source.resolve(&name).await,
        }
    }
}
