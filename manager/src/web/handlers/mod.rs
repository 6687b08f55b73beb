//! HTTP request handlers for the Manager API.
//!
//! This module is organized by domain:
//! - `common` - Response envelope and error mapping
//! - `sessions` - Session commands and queries
//! - `targets` - Target lock inspection and override
//! - `events` - Server-sent session event stream

pub mod common;
pub mod events;
pub mod sessions;
pub mod targets;

pub use events::*;
pub use sessions::*;
pub use targets::*;
