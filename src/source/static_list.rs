//! Discovery source with a fixed topology, usually from the `services` config section

use async_trait::async_trait;

use super::{DiscoverySource, SourceError};
use crate::config::AppConfig;
use crate::discovery::Discovery;

pub struct StaticSource {
    discoveries: Vec<Discovery>,
}

impl StaticSource {
    pub fn new(discoveries: Vec<Discovery>) -> Self {
        Self { discoveries }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.discoveries())
    }
}

#[async_trait]
impl DiscoverySource for StaticSource {
    async fn fetch(&self) -> Result<Vec<Discovery>, SourceError> {
        Ok(self.discoveries.clone())
    }

    fn name(&self) -> &str {
        "static"
    }
}
