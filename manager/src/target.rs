use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::connection::AGENT_PORT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reachability {
    #[default]
    Unknown,
    Reachable,
    Unreachable,
}

/// Remote host addressed for acquisition; never mutated once a session holds it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub address: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub reachability: Reachability,
    #[serde(default = "default_agent_port")]
    pub agent_port: u16,
}

fn default_agent_port() -> u16 {
    AGENT_PORT
}

impl Target {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            domain: None,
            reachability: Reachability::Unknown,
            agent_port: AGENT_PORT,
        }
    }

    pub fn with_agent_port(mut self, port: u16) -> Self {
        self.agent_port = port;
        self
    }

    /// Copy of this target carrying the reachability a session observed
    pub fn observed(&self, reachability: Reachability) -> Self {
        Self {
            reachability,
            ..self.clone()
        }
    }

    /// Registry key: two spellings of the same address map to one target
    pub fn identity(&self) -> String {
        self.address.trim().to_ascii_lowercase()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.domain {
            Some(domain) => write!(f, "{} ({})", self.address, domain),
            None => write!(f, "{}", self.address),
        }
    }
}
