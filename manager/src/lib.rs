pub mod cancel;
pub mod cleanup;
pub mod config;
pub mod connection;
pub mod constants;
pub mod credential;
pub mod deployer;
pub mod errors;
pub mod events;
pub mod evidence;
pub mod progress;
pub mod registry;
pub mod remote;
pub mod retry;
pub mod services;
pub mod session;
pub mod target;
pub mod web;

// Re-export commonly used types
pub use cancel::{CancelToken, StopReason};
pub use config::{Config, ConfigManager, SecretsCredentialSource};
pub use credential::{Credential, CredentialInput, CredentialSource, Secret};
pub use deployer::HelperKind;
pub use errors::{AcquisitionError, ErrorKind, RemoteError};
pub use events::{EventBus, SessionEvent};
pub use evidence::{EvidenceStore, JsonEvidenceStore, MemoryEvidenceStore};
pub use registry::SessionRegistry;
pub use remote::{FakeRemote, HttpRemoteExecutor, RemoteExecutor};
pub use services::{AcquisitionService, SessionContext, SessionRequest};
pub use session::{AcquisitionSession, SessionSnapshot, SessionState};
pub use target::Target;
