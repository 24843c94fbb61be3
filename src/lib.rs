//! cloud-balance: service discovery registry and client-side load balancing
//!
//! Features:
//! - Per-service discovery snapshots swapped atomically on topology change
//! - Round-robin selection of `protocol://ip:port` addresses
//! - Static and file-backed discovery sources with periodic refresh
//! - `lb://service/path` URL resolution

pub mod balance;
pub mod config;
pub mod discovery;
pub mod source;
pub mod upstream;

pub use balance::{build_balancer, BalancerSet, LoadBalancer, RoundRobinBalancer};
pub use config::AppConfig;
pub use discovery::{Discovery, DiscoveryRegistry, Node, SharedDiscovery, Subscription};
pub use upstream::UpstreamResolver;
