//! Load balancing over discovered service nodes

mod balancer;
mod round_robin;

pub use balancer::LoadBalancer;
pub use round_robin::{RoundRobinBalancer, INDEX_MAX};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use crate::discovery::DiscoveryRegistry;

/// Strategy names accepted by [`build_balancer`]
pub const SUPPORTED_STRATEGIES: &[&str] = &["round_robin"];

#[derive(Debug, thiserror::Error)]
pub enum BalanceError {
    #[error("Unknown load balancer strategy: '{0}'. Supported: round_robin")]
    UnknownStrategy(String),
}

/// Build a load balancer for one service using the named strategy
pub fn build_balancer(
    registry: &DiscoveryRegistry,
    service: &str,
    strategy: &str,
) -> Result<Arc<dyn LoadBalancer>, BalanceError> {
    match strategy {
        "round_robin" => Ok(Arc::new(RoundRobinBalancer::new(registry, service))),
        other => Err(BalanceError::UnknownStrategy(other.to_string())),
    }
}

/// One shared balancer per service name
///
/// Every caller asking for the same service gets the same balancer, so the
/// rotation is spread across all of them instead of each starting at node 0.
///
/// Balancers are cached for services that had a snapshot when first asked
/// for, plus any created through `get_or_create`. Lookups of names the
/// registry has never seen do not grow the cache.
pub struct BalancerSet {
    registry: DiscoveryRegistry,
    strategy: String,
    balancers: DashMap<String, Arc<dyn LoadBalancer>>,
}

impl BalancerSet {
    pub fn new(registry: DiscoveryRegistry, strategy: impl Into<String>) -> Result<Self, BalanceError> {
        let strategy = strategy.into();
        if !SUPPORTED_STRATEGIES.contains(&strategy.as_str()) {
            return Err(BalanceError::UnknownStrategy(strategy));
        }
        Ok(Self {
            registry,
            strategy,
            balancers: DashMap::new(),
        })
    }

    /// Get the balancer for `service`, creating it on first use
    pub fn get_or_create(&self, service: &str) -> Result<Arc<dyn LoadBalancer>, BalanceError> {
        if let Some(balancer) = self.balancers.get(service) {
            return Ok(Arc::clone(balancer.value()));
        }

        let balancer = match self.balancers.entry(service.to_string()) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let balancer = build_balancer(&self.registry, service, &self.strategy)?;
                tracing::info!(
                    service = %service,
                    strategy = balancer.strategy_name(),
                    "Load balancer created"
                );
                Arc::clone(entry.insert(balancer).value())
            }
        };
        Ok(balancer)
    }

    /// Pick a server for `service`
    ///
    /// Unknown services yield `None` without creating a balancer.
    pub fn get_server(&self, service: &str) -> Result<Option<String>, BalanceError> {
        if let Some(balancer) = self.balancers.get(service) {
            return Ok(balancer.value().get_server());
        }
        if self.registry.find(service).is_none() {
            return Ok(None);
        }
        Ok(self.get_or_create(service)?.get_server())
    }

    pub fn registry(&self) -> &DiscoveryRegistry {
        &self.registry
    }

    pub fn strategy(&self) -> &str {
        &self.strategy
    }

    pub fn len(&self) -> usize {
        self.balancers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balancers.is_empty()
    }
}
