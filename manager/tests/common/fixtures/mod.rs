//! This module provides reusable test utilities:
//! - A wiremock-based fake agent
//! - Test configuration builders (in memory and on disk)
//! - A service harness wired to the in-memory remote host
//! - Common test data

// Allow unused code in test fixtures - not every test binary uses every helper
#![allow(dead_code)]
#![allow(unused_imports)]

pub mod mock_agent;
pub mod test_config;
pub mod test_data;
pub mod test_service;

// Re-export commonly used items
pub use mock_agent::MockAgentServer;
pub use test_config::{ConfigDirBuilder, TestConfigBuilder};
pub use test_data::*;
pub use test_service::TestService;
