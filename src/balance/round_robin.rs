//! Round-robin load balancing strategy

use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::balancer::LoadBalancer;
use crate::discovery::{Discovery, DiscoveryRegistry, SharedDiscovery};

/// The index is reset to zero once it grows past this value
pub const INDEX_MAX: usize = 99_999_999;

/// Where a balancer reads its node list from
enum Snapshot {
    /// The registry's own cell for the service
    Registry(SharedDiscovery),
    /// A private cell replaced through `update`
    Detached(ArcSwapOption<Discovery>),
}

impl Snapshot {
    fn load(&self) -> Option<Arc<Discovery>> {
        match self {
            Snapshot::Registry(shared) => shared.load(),
            Snapshot::Detached(cell) => cell.load_full(),
        }
    }
}

/// Round-robin load balancer that cycles through the nodes of one service
///
/// The node list is a shared snapshot that the registry replaces whenever the
/// topology changes; the balancer itself owns only the counter.
///
/// The counter is not updated atomically as a whole: the wrap check and the
/// increment are separate relaxed operations. Concurrent callers may pick the
/// same node or skip one, which only makes the rotation approximate.
pub struct RoundRobinBalancer {
    service: String,
    discovery: Snapshot,
    index: AtomicUsize,
}

impl RoundRobinBalancer {
    /// Create a balancer that follows `service` in the registry
    pub fn new(registry: &DiscoveryRegistry, service: impl Into<String>) -> Self {
        let service = service.into();
        let shared = registry.shared(&service);

        tracing::debug!(service = %service, "Created round-robin balancer");

        Self {
            service,
            discovery: Snapshot::Registry(shared),
            index: AtomicUsize::new(0),
        }
    }

    /// Create a balancer with no registry behind it; feed it with [`update`](Self::update)
    pub fn detached(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            discovery: Snapshot::Detached(ArcSwapOption::empty()),
            index: AtomicUsize::new(0),
        }
    }

    /// Replace the snapshot of a detached balancer
    ///
    /// A balancer built with [`new`](Self::new) follows the registry; push to
    /// the registry instead. Updates sent to it are ignored.
    pub fn update(&self, discovery: Arc<Discovery>) {
        match &self.discovery {
            Snapshot::Detached(cell) => cell.store(Some(discovery)),
            Snapshot::Registry(_) => {
                tracing::warn!(
                    service = %self.service,
                    "Ignoring update on a registry-backed balancer"
                );
            }
        }
    }

    /// Current snapshot, if any
    pub fn discovery(&self) -> Option<Arc<Discovery>> {
        self.discovery.load()
    }

    fn next_index(&self) -> usize {
        let mut index = self.index.load(Ordering::Relaxed);
        if index > INDEX_MAX {
            index = 0;
        }
        self.index.store(index + 1, Ordering::Relaxed);
        index
    }
}

impl LoadBalancer for RoundRobinBalancer {
    fn get_server(&self) -> Option<String> {
        let discovery = self.discovery.load()?;
        let cluster = &discovery.cluster;
        if cluster.is_empty() {
            return None;
        }

        let node = &cluster[self.next_index() % cluster.len()];
        Some(node.url())
    }

    fn service(&self) -> &str {
        &self.service
    }

    fn strategy_name(&self) -> &'static str {
        "round_robin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::Node;

    fn make_discovery(ports: &[u16]) -> Discovery {
        Discovery::new(
            "svc",
            ports.iter().map(|p| Node::new("localhost", *p)).collect(),
        )
    }

    #[test]
    fn test_no_discovery_returns_none() {
        let balancer = RoundRobinBalancer::detached("svc");
        assert_eq!(balancer.get_server(), None);
    }

    #[test]
    fn test_unpopulated_registry_returns_none() {
        let registry = DiscoveryRegistry::new();
        let balancer = RoundRobinBalancer::new(&registry, "svc");
        assert_eq!(balancer.get_server(), None);
    }

    #[test]
    fn test_empty_cluster_returns_none() {
        let balancer = RoundRobinBalancer::detached("svc");
        balancer.update(Arc::new(make_discovery(&[])));
        assert_eq!(balancer.get_server(), None);
    }

    #[test]
    fn test_round_robin_cycling() {
        let balancer = RoundRobinBalancer::detached("svc");
        balancer.update(Arc::new(make_discovery(&[8080, 8081, 8082])));

        assert_eq!(balancer.get_server().unwrap(), "http://localhost:8080");
        assert_eq!(balancer.get_server().unwrap(), "http://localhost:8081");
        assert_eq!(balancer.get_server().unwrap(), "http://localhost:8082");
        assert_eq!(balancer.get_server().unwrap(), "http://localhost:8080");
    }

    #[test]
    fn test_round_robin_single_node() {
        let balancer = RoundRobinBalancer::detached("svc");
        balancer.update(Arc::new(make_discovery(&[8080])));

        assert_eq!(balancer.get_server().unwrap(), "http://localhost:8080");
        assert_eq!(balancer.get_server().unwrap(), "http://localhost:8080");
    }

    #[test]
    fn test_protocol_in_url() {
        let balancer = RoundRobinBalancer::detached("svc");
        balancer.update(Arc::new(Discovery::new(
            "svc",
            vec![
                Node::new("10.0.0.1", 8080).with_protocol(""),
                Node::new("10.0.0.2", 9090).with_protocol("https"),
            ],
        )));

        assert_eq!(balancer.get_server().unwrap(), "http://10.0.0.1:8080");
        assert_eq!(balancer.get_server().unwrap(), "https://10.0.0.2:9090");
    }

    #[test]
    fn test_follows_registry_updates() {
        let registry = DiscoveryRegistry::new();
        let balancer = RoundRobinBalancer::new(&registry, "svc");

        registry.push(make_discovery(&[8080, 8081]));
        assert_eq!(balancer.get_server().unwrap(), "http://localhost:8080");

        registry.push(make_discovery(&[9000]));
        assert_eq!(balancer.get_server().unwrap(), "http://localhost:9000");
    }

    #[test]
    fn test_picks_up_existing_snapshot() {
        let registry = DiscoveryRegistry::new();
        registry.push(make_discovery(&[8080]));

        let balancer = RoundRobinBalancer::new(&registry, "svc");
        assert_eq!(balancer.get_server().unwrap(), "http://localhost:8080");
    }

    #[test]
    fn test_shrinking_cluster_mid_sequence() {
        let balancer = RoundRobinBalancer::detached("svc");
        balancer.update(Arc::new(make_discovery(&[1, 2, 3, 4, 5])));
        for _ in 0..4 {
            balancer.get_server();
        }

        balancer.update(Arc::new(make_discovery(&[7, 8])));
        // index is 4 here, 4 % 2 == 0
        assert_eq!(balancer.get_server().unwrap(), "http://localhost:7");
        assert_eq!(balancer.get_server().unwrap(), "http://localhost:8");
    }

    #[test]
    fn test_removed_service_returns_none() {
        let registry = DiscoveryRegistry::new();
        let balancer = RoundRobinBalancer::new(&registry, "svc");
        registry.push(make_discovery(&[8080]));
        assert!(balancer.get_server().is_some());

        registry.remove("svc");
        assert_eq!(balancer.get_server(), None);
    }

    #[test]
    fn test_index_wraps_past_max() {
        let balancer = RoundRobinBalancer::detached("svc");
        balancer.update(Arc::new(make_discovery(&[1, 2, 3])));
        balancer.index.store(INDEX_MAX + 1, Ordering::Relaxed);

        assert_eq!(balancer.get_server().unwrap(), "http://localhost:1");
        assert_eq!(balancer.index.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_index_at_max_is_still_used() {
        let balancer = RoundRobinBalancer::detached("svc");
        balancer.update(Arc::new(make_discovery(&[1, 2, 3])));
        balancer.index.store(INDEX_MAX, Ordering::Relaxed);

        // 99_999_999 % 3 == 0
        assert_eq!(balancer.get_server().unwrap(), "http://localhost:1");
        assert_eq!(balancer.index.load(Ordering::Relaxed), INDEX_MAX + 1);
    }

    #[test]
    fn test_dropping_balancer_releases_registry_entry() {
        let registry = DiscoveryRegistry::new();
        let balancer = RoundRobinBalancer::new(&registry, "svc");
        assert_eq!(registry.entry_count(), 1);

        drop(balancer);
        assert_eq!(registry.entry_count(), 0);
    }

    #[test]
    fn test_update_ignored_when_following_registry() {
        let registry = DiscoveryRegistry::new();
        registry.push(make_discovery(&[8080]));
        let balancer = RoundRobinBalancer::new(&registry, "svc");

        balancer.update(Arc::new(make_discovery(&[9999])));
        assert_eq!(balancer.get_server().unwrap(), "http://localhost:8080");
    }

    #[test]
    fn test_created_during_push_sees_latest() {
        for round in 0..500 {
            let registry = DiscoveryRegistry::new();
            registry.push(make_discovery(&[1]));

            let pusher = {
                let registry = registry.clone();
                std::thread::spawn(move || registry.push(make_discovery(&[2])))
            };
            let balancer = RoundRobinBalancer::new(&registry, "svc");
            pusher.join().unwrap();

            let latest = registry.find("svc").unwrap();
            assert!(
                Arc::ptr_eq(&balancer.discovery().unwrap(), &latest),
                "balancer stale in round {}",
                round
            );
            assert_eq!(balancer.get_server().unwrap(), "http://localhost:2");
        }
    }

    #[test]
    fn test_concurrent_callers_do_not_panic() {
        let balancer = Arc::new(RoundRobinBalancer::detached("svc"));
        balancer.update(Arc::new(make_discovery(&[1, 2, 3])));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let balancer = Arc::clone(&balancer);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        assert!(balancer.get_server().is_some());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_strategy_name() {
        let balancer = RoundRobinBalancer::detached("svc");
        assert_eq!(balancer.strategy_name(), "round_robin");
        assert_eq!(balancer.service(), "svc");
    }
}
