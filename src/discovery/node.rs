//! A single reachable instance of a service

use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol used when a node does not declare one
pub const DEFAULT_PROTOCOL: &str = "http";

/// One concrete endpoint of a service
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Node {
    pub ip: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

impl Node {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
            protocol: None,
        }
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    /// Protocol of this node, falling back to `http` when unset or empty
    pub fn protocol(&self) -> &str {
        match self.protocol.as_deref() {
            Some(p) if !p.is_empty() => p,
            _ => DEFAULT_PROTOCOL,
        }
    }

    /// Render as `protocol://ip:port`
    pub fn url(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol(), self.ip, self.port)
    }
}
