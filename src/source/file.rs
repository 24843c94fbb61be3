//! Discovery source backed by a YAML file that is re-read on every fetch

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::{DiscoverySource, SourceError};
use crate::config::load_services_file;
use crate::discovery::Discovery;

pub struct FileSource {
    path: PathBuf,
    name: String,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = format!("file:{}", path.display());
        Self { path, name }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DiscoverySource for FileSource {
    async fn fetch(&self) -> Result<Vec<Discovery>, SourceError> {
        let path = self.path.clone();
        let file = tokio::task::spawn_blocking(move || load_services_file(path)).await??;

        Ok(file
            .services
            .iter()
            .map(|(name, service)| service.to_discovery(name))
            .collect())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
