//! Discovery sources feeding the registry

mod file;
mod static_list;

pub use file::FileSource;
pub use static_list::StaticSource;

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::ConfigError;
use crate::discovery::{Discovery, DiscoveryRegistry};

/// Something that knows the current topology of one or more services
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    /// Fetch the full current topology
    async fn fetch(&self) -> Result<Vec<Discovery>, SourceError>;

    /// Name of the source (for logging)
    fn name(&self) -> &str;
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Failed to load discovery data: {0}")]
    Config(#[from] ConfigError),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("{0}")]
    Other(String),
}

/// Pushes the topology of one source into a registry
///
/// Services the source reported on a previous sync but no longer reports are
/// removed from the registry. Unchanged snapshots are not republished.
pub struct SourcePoller {
    registry: DiscoveryRegistry,
    source: Arc<dyn DiscoverySource>,
    known: BTreeSet<String>,
}

impl SourcePoller {
    pub fn new(registry: DiscoveryRegistry, source: Arc<dyn DiscoverySource>) -> Self {
        Self {
            registry,
            source,
            known: BTreeSet::new(),
        }
    }

    /// Fetch once and publish; returns how many services changed
    pub async fn sync_once(&mut self) -> Result<usize, SourceError> {
        let discoveries = self.source.fetch().await?;
        let mut seen = BTreeSet::new();
        let mut changed = 0;

        for discovery in discoveries {
            seen.insert(discovery.service.clone());

            let unchanged = self
                .registry
                .find(&discovery.service)
                .is_some_and(|current| *current == discovery);
            if unchanged {
                continue;
            }

            tracing::info!(
                source = self.source.name(),
                service = %discovery.service,
                nodes = discovery.len(),
                "Service topology updated"
            );
            self.registry.push(discovery);
            changed += 1;
        }

        for gone in self.known.difference(&seen) {
            tracing::info!(
                source = self.source.name(),
                service = %gone,
                "Service no longer reported, removing"
            );
            self.registry.remove(gone);
            changed += 1;
        }

        let pruned = self.registry.prune_idle();
        if pruned > 0 {
            tracing::debug!(source = self.source.name(), pruned, "Pruned idle discovery entries");
        }

        self.known = seen;
        Ok(changed)
    }

    /// Sync every `interval` until `shutdown` becomes `true`
    ///
    /// A failed fetch is logged and the previous topology is kept.
    pub fn spawn(mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sync_once().await {
                            tracing::warn!(
                                source = self.source.name(),
                                error = %e,
                                "Discovery sync failed, keeping previous topology"
                            );
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::debug!(source = self.source.name(), "Discovery poller stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::Node;
    use std::sync::Mutex;

    /// Source that returns whatever the test last queued
    struct ScriptedSource {
        next: Mutex<Result<Vec<Discovery>, String>>,
    }

    impl ScriptedSource {
        fn new(discoveries: Vec<Discovery>) -> Arc<Self> {
            Arc::new(Self {
                next: Mutex::new(Ok(discoveries)),
            })
        }

        fn set(&self, next: Result<Vec<Discovery>, String>) {
            *self.next.lock().unwrap() = next;
        }
    }

    #[async_trait]
    impl DiscoverySource for ScriptedSource {
        async fn fetch(&self) -> Result<Vec<Discovery>, SourceError> {
            self.next.lock().unwrap().clone().map_err(SourceError::Other)
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn discovery(service: &str, ports: &[u16]) -> Discovery {
        Discovery::new(
            service,
            ports.iter().map(|p| Node::new("10.0.0.1", *p)).collect(),
        )
    }

    #[tokio::test]
    async fn test_sync_pushes_all_services() {
        let registry = DiscoveryRegistry::new();
        let source = ScriptedSource::new(vec![discovery("a", &[1]), discovery("b", &[2, 3])]);
        let mut poller = SourcePoller::new(registry.clone(), source);

        assert_eq!(poller.sync_once().await.unwrap(), 2);
        assert_eq!(registry.services(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(registry.find("b").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_sync_skips_unchanged() {
        let registry = DiscoveryRegistry::new();
        let source = ScriptedSource::new(vec![discovery("a", &[1])]);
        let mut poller = SourcePoller::new(registry.clone(), source);

        poller.sync_once().await.unwrap();
        let before = registry.find("a").unwrap();
        assert_eq!(poller.sync_once().await.unwrap(), 0);
        assert!(Arc::ptr_eq(&before, &registry.find("a").unwrap()));
    }

    #[tokio::test]
    async fn test_sync_removes_vanished_services() {
        let registry = DiscoveryRegistry::new();
        let source = ScriptedSource::new(vec![discovery("a", &[1]), discovery("b", &[2])]);
        let mut poller = SourcePoller::new(registry.clone(), source.clone());
        poller.sync_once().await.unwrap();

        source.set(Ok(vec![discovery("a", &[1])]));
        assert_eq!(poller.sync_once().await.unwrap(), 1);
        assert_eq!(registry.services(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_sync_prunes_abandoned_watch_entries() {
        let registry = DiscoveryRegistry::new();
        let source = ScriptedSource::new(vec![discovery("a", &[1])]);
        let mut poller = SourcePoller::new(registry.clone(), source);

        drop(registry.watch("never-reported"));
        assert_eq!(registry.entry_count(), 1);

        poller.sync_once().await.unwrap();
        assert_eq!(registry.entry_count(), 1);
        assert!(registry.find("a").is_some());
    }

    #[tokio::test]
    async fn test_sync_error_keeps_topology() {
        let registry = DiscoveryRegistry::new();
        let source = ScriptedSource::new(vec![discovery("a", &[1])]);
        let mut poller = SourcePoller::new(registry.clone(), source.clone());
        poller.sync_once().await.unwrap();

        source.set(Err("unreachable".to_string()));
        let err = poller.sync_once().await.unwrap_err();
        assert!(err.to_string().contains("unreachable"));
        assert_eq!(registry.find("a").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_spawned_poller_stops_on_shutdown() {
        let registry = DiscoveryRegistry::new();
        let source = ScriptedSource::new(vec![discovery("a", &[1])]);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut rx = registry.watch("a");
        let handle = SourcePoller::new(registry.clone(), source)
            .spawn(Duration::from_millis(10), shutdown_rx);

        rx.changed().await.unwrap();
        assert!(registry.find("a").is_some());

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
