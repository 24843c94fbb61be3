//! Process-local registry of discovery snapshots per service name

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;

use super::Discovery;

/// Callback invoked with the new snapshot whenever a service changes
pub type DiscoveryCallback = Arc<dyn Fn(Arc<Discovery>) + Send + Sync>;

/// Per-service state: the current snapshot plus everyone listening for it
struct ServiceEntry {
    current: Arc<ArcSwapOption<Discovery>>,
    subscribers: DashMap<u64, DiscoveryCallback>,
    watch_tx: watch::Sender<Option<Arc<Discovery>>>,
}

impl ServiceEntry {
    fn new() -> Self {
        let (watch_tx, _) = watch::channel(None);
        Self {
            current: Arc::new(ArcSwapOption::empty()),
            subscribers: DashMap::new(),
            watch_tx,
        }
    }

    /// Notify subscribers and watchers of a snapshot that is already stored
    fn notify(&self, snapshot: Option<Arc<Discovery>>, notify_with: Arc<Discovery>) {
        // Collect first so no shard lock is held while user callbacks run.
        let callbacks: Vec<DiscoveryCallback> = self
            .subscribers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for callback in callbacks {
            callback(Arc::clone(&notify_with));
        }

        // Watchers wake last so callback-driven state is already current.
        self.watch_tx.send_replace(snapshot);
    }

    /// Nothing stored and nobody holding on to this entry
    fn is_idle(&self) -> bool {
        self.current.load().is_none()
            && self.subscribers.is_empty()
            && Arc::strong_count(&self.current) == 1
            && self.watch_tx.receiver_count() == 0
    }
}

/// Registry of the latest known node list for each service
///
/// Cloning is cheap; clones share the same underlying state. Updates are
/// last-write-wins: each `push` replaces the whole cluster with a single
/// pointer swap, so readers see either the old or the new list, never a mix.
///
/// A service entry lives as long as it has a snapshot, a subscriber, a
/// [`SharedDiscovery`] or a watcher. Entries left with none of these are
/// dropped by `remove`, by releasing the last handle, or by [`prune_idle`](Self::prune_idle).
#[derive(Clone, Default)]
pub struct DiscoveryRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    services: DashMap<String, Arc<ServiceEntry>>,
    next_id: AtomicU64,
}

impl RegistryInner {
    /// Run `f` on the entry for `service` while its map shard is locked
    ///
    /// Holding the shard lock keeps a concurrent prune from dropping the
    /// entry between lookup and registration. `f` must not touch `services`.
    fn with_entry<R>(&self, service: &str, f: impl FnOnce(&Arc<ServiceEntry>) -> R) -> R {
        let entry = self
            .services
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(ServiceEntry::new()));
        f(entry.value())
    }

    fn prune(&self, service: &str) {
        if self.services.remove_if(service, |_, entry| entry.is_idle()).is_some() {
            tracing::trace!(service = %service, "Pruned idle discovery entry");
        }
    }
}

impl DiscoveryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in a service
    ///
    /// The callback fires on every change to the service's node list. When a
    /// snapshot already exists it fires once immediately with that snapshot.
    /// If a push races with registration the callback always ends on the
    /// latest snapshot. Dropping the returned [`Subscription`] stops further
    /// notifications.
    pub fn attention<F>(&self, service: &str, callback: F) -> Subscription
    where
        F: Fn(Arc<Discovery>) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let callback: DiscoveryCallback = Arc::new(callback);

        let entry = self.inner.with_entry(service, |entry| {
            entry.subscribers.insert(id, Arc::clone(&callback));
            Arc::clone(entry)
        });

        tracing::debug!(service = %service, subscription = id, "Registered discovery subscriber");

        // A push landing between our load and our callback may already have
        // delivered a newer snapshot; re-deliver until what we sent last is
        // what is stored.
        let mut delivered: Option<Arc<Discovery>> = None;
        loop {
            let current = entry.current.load_full();
            let up_to_date = match (&current, &delivered) {
                (Some(c), Some(d)) => Arc::ptr_eq(c, d),
                (None, None) => true,
                _ => false,
            };
            if up_to_date {
                break;
            }
            callback(
                current
                    .clone()
                    .unwrap_or_else(|| Arc::new(Discovery::empty(service))),
            );
            delivered = current;
        }

        Subscription {
            service: service.to_string(),
            registry: Arc::downgrade(&self.inner),
            entry: Arc::downgrade(&entry),
            id,
        }
    }

    /// Shared read access to a service's snapshot cell
    ///
    /// The handle reads exactly what the registry stores, with no copy in
    /// between, so it can never lag behind a completed `push`.
    pub fn shared(&self, service: &str) -> SharedDiscovery {
        let cell = self.inner.with_entry(service, |entry| Arc::clone(&entry.current));
        SharedDiscovery {
            service: service.to_string(),
            cell: Some(cell),
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Replace the snapshot for `discovery.service` and notify subscribers
    pub fn push(&self, discovery: Discovery) {
        let service = discovery.service.clone();
        let snapshot = Arc::new(discovery);

        let entry = self.inner.with_entry(&service, |entry| {
            entry.current.store(Some(Arc::clone(&snapshot)));
            Arc::clone(entry)
        });

        tracing::debug!(
            service = %service,
            nodes = snapshot.len(),
            subscribers = entry.subscribers.len(),
            "Publishing discovery snapshot"
        );

        entry.notify(Some(Arc::clone(&snapshot)), snapshot);
    }

    /// Forget a service; subscribers are notified with an empty cluster
    pub fn remove(&self, service: &str) {
        let entry = self.inner.services.get(service).and_then(|entry| {
            entry
                .current
                .swap(None)
                .map(|_| Arc::clone(entry.value()))
        });
        let Some(entry) = entry else {
            return;
        };

        tracing::debug!(service = %service, "Removing discovery snapshot");
        entry.notify(None, Arc::new(Discovery::empty(service)));
        drop(entry);
        self.inner.prune(service);
    }

    /// Current snapshot for a service, if one has been pushed
    pub fn find(&self, service: &str) -> Option<Arc<Discovery>> {
        self.inner
            .services
            .get(service)
            .and_then(|entry| entry.current.load_full())
    }

    /// Async view of a service's snapshot
    ///
    /// The receiver starts at the current value (`None` before the first
    /// push) and observes every later replacement.
    pub fn watch(&self, service: &str) -> watch::Receiver<Option<Arc<Discovery>>> {
        self.inner.with_entry(service, |entry| entry.watch_tx.subscribe())
    }

    /// Names of all services that currently have a snapshot, sorted
    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .services
            .iter()
            .filter(|entry| entry.current.load().is_some())
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Number of live subscribers for a service
    pub fn subscriber_count(&self, service: &str) -> usize {
        self.inner
            .services
            .get(service)
            .map(|entry| entry.subscribers.len())
            .unwrap_or(0)
    }

    /// Number of service entries held, including ones without a snapshot
    pub fn entry_count(&self) -> usize {
        self.inner.services.len()
    }

    /// Drop every entry with no snapshot and nobody referencing it
    ///
    /// Entries kept alive only by dropped `watch` receivers are not noticed
    /// until the next prune; everything else prunes itself.
    pub fn prune_idle(&self) -> usize {
        let before = self.inner.services.len();
        self.inner.services.retain(|_, entry| !entry.is_idle());
        before.saturating_sub(self.inner.services.len())
    }
}

/// Handle returned by [`DiscoveryRegistry::attention`]
///
/// The callback stays registered for as long as this handle is alive.
#[must_use = "dropping a Subscription unregisters its callback"]
pub struct Subscription {
    service: String,
    registry: Weak<RegistryInner>,
    entry: Weak<ServiceEntry>,
    id: u64,
}

impl Subscription {
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Unregister the callback now
    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.upgrade() {
            entry.subscribers.remove(&self.id);
            tracing::debug!(service = %self.service, subscription = self.id, "Dropped discovery subscriber");
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.prune(&self.service);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("service", &self.service)
            .field("id", &self.id)
            .finish()
    }
}

/// Live view of one service's snapshot, returned by [`DiscoveryRegistry::shared`]
pub struct SharedDiscovery {
    service: String,
    // Only `None` while dropping, so the entry sees its cell released before pruning.
    cell: Option<Arc<ArcSwapOption<Discovery>>>,
    registry: Weak<RegistryInner>,
}

impl SharedDiscovery {
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Current snapshot, `None` before the first push or after removal
    pub fn load(&self) -> Option<Arc<Discovery>> {
        self.cell.as_ref().and_then(|cell| cell.load_full())
    }
}

impl Drop for SharedDiscovery {
    fn drop(&mut self) {
        drop(self.cell.take());
        if let Some(registry) = self.registry.upgrade() {
            registry.prune(&self.service);
        }
    }
}

impl std::fmt::Debug for SharedDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedDiscovery")
            .field("service", &self.service)
            .finish()
    }
}
