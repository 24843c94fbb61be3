mod loader;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::balance::SUPPORTED_STRATEGIES;
use crate::discovery::{Discovery, Node};

pub use loader::{load_config, load_services_file};

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub balancer: BalancerConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Statically declared services, keyed by service name
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
}

/// Load balancer selection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BalancerConfig {
    #[serde(default = "default_strategy")]
    pub strategy: String,
}

fn default_strategy() -> String {
    "round_robin".to_string()
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
        }
    }
}

/// External discovery feed configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    /// YAML file with a `services` section, re-read every `refresh_seconds`
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default = "default_refresh_seconds")]
    pub refresh_seconds: u64,
}

fn default_refresh_seconds() -> u64 {
    10
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            file: None,
            refresh_seconds: default_refresh_seconds(),
        }
    }
}

/// Node list of one service
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub nodes: Vec<Node>,
}

impl ServiceConfig {
    pub fn to_discovery(&self, service: &str) -> Discovery {
        Discovery::new(service, self.nodes.clone())
    }
}

/// Contents of a discovery file read by [`crate::source::FileSource`]
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServicesFile {
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
}

/// Check a service map for nodes that can never be reached
pub(crate) fn validate_services(services: &BTreeMap<String, ServiceConfig>) -> Result<(), ConfigError> {
    for (name, service) in services {
        if name.trim().is_empty() {
            return Err(ConfigError::Validation("service name must not be empty".to_string()));
        }
        for node in &service.nodes {
            if node.ip.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "service '{}' has a node with an empty ip",
                    name
                )));
            }
            if node.port == 0 {
                return Err(ConfigError::Validation(format!(
                    "service '{}' node {} has port 0",
                    name, node.ip
                )));
            }
        }
    }
    Ok(())
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        load_config(path)
    }

    /// Load configuration with fallback to default path
    pub fn load_or_default(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        match config_path {
            Some(path) => Self::from_file(path),
            None => {
                let default_paths = ["config.yaml", "config.yml", "./config/config.yaml"];
                for p in default_paths {
                    let path = Path::new(p);
                    if path.exists() {
                        return Self::from_file(path);
                    }
                }
                Err(ConfigError::NotFound(
                    "No config file found. Tried: config.yaml, config.yml, ./config/config.yaml"
                        .to_string(),
                ))
            }
        }
    }

    /// Reject settings the balancer and sources cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !SUPPORTED_STRATEGIES.contains(&self.balancer.strategy.as_str()) {
            return Err(ConfigError::Validation(format!(
                "unknown balancer strategy '{}'",
                self.balancer.strategy
            )));
        }
        if self.discovery.refresh_seconds == 0 {
            return Err(ConfigError::Validation(
                "discovery.refresh_seconds must be greater than 0".to_string(),
            ));
        }
        validate_services(&self.services)
    }

    /// Static services as discovery snapshots
    pub fn discoveries(&self) -> Vec<Discovery> {
        self.services
            .iter()
            .map(|(name, service)| service.to_discovery(name))
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}
