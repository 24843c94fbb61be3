//! Service discovery: nodes, snapshots and the registry that holds them

mod node;
mod registry;

pub use node::{Node, DEFAULT_PROTOCOL};
pub use registry::{DiscoveryCallback, DiscoveryRegistry, SharedDiscovery, Subscription};

use serde::{Deserialize, Serialize};

/// Current known membership of one service
///
/// A `Discovery` is never modified after it is published. Topology changes
/// produce a new value that replaces the old one in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Discovery {
    pub service: String,
    #[serde(default)]
    pub cluster: Vec<Node>,
}

impl Discovery {
    pub fn new(service: impl Into<String>, cluster: Vec<Node>) -> Self {
        Self {
            service: service.into(),
            cluster,
        }
    }

    /// A snapshot with no reachable nodes
    pub fn empty(service: impl Into<String>) -> Self {
        Self::new(service, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.cluster.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cluster.len()
    }
}
