//! Common test data and constants

use forensic_manager::credential::{Credential, CredentialInput};
use forensic_manager::deployer::HelperKind;
use forensic_manager::services::SessionRequest;

/// Target hosts
pub mod targets {
    pub const WORKSTATION: &str = "10.0.0.5";
    pub const FILE_SERVER: &str = "10.0.0.17";
}

/// Accounts the fake hosts accept
pub mod accounts {
    pub const USERNAME: &str = "CORP\\ir-responder";
    pub const SECRET: &str = "Tr0ub4dor&3-unique-marker";
    pub const WRONG_SECRET: &str = "hunter2-wrong-marker";
    pub const PROFILE: &str = "corp-admin";
}

/// Remote layout the test configs deploy into
pub mod remote {
    pub const WORK_DIR: &str = "C:\\Temp\\ir";
    pub const FILE_BROWSER_PORT: u16 = 8080;
    pub const FILE_BROWSER_BINARY: &str = "C:\\Temp\\ir\\filebrowser.exe";
    pub const FILE_BROWSER_DB: &str = "C:\\Temp\\ir\\filebrowser.db";
    pub const MEMORY_IMAGER_BINARY: &str = "C:\\Temp\\ir\\winpmem.exe";
    pub const MEMORY_IMAGE: &str = "C:\\Temp\\ir\\memory.raw";
    pub const MEMORY_IMAGE_BYTES: u64 = 8 * 1024 * 1024 * 1024;
}

pub const CASE_ID: &str = "CASE-2026-0042";

pub fn valid_credential() -> CredentialInput {
    CredentialInput::Inline(Credential::new(accounts::USERNAME, accounts::SECRET))
}

pub fn wrong_credential() -> CredentialInput {
    CredentialInput::Inline(Credential::new(accounts::USERNAME, accounts::WRONG_SECRET))
}

pub fn session_request(target: &str, deployments: &[HelperKind]) -> SessionRequest {
    SessionRequest {
        target: target.to_string(),
        deployments: deployments.to_vec(),
        credential: valid_credential(),
        case_id: Some(CASE_ID.to_string()),
        operator: Some("analyst-1".to_string()),
    }
}

pub fn file_browser_request(target: &str) -> SessionRequest {
    session_request(target, &[HelperKind::FileBrowser])
}
