pub mod auth;
pub mod files;
pub mod process_manager;

pub use auth::{AdminCredential, TokenStore};
pub use process_manager::ProcessManager;
