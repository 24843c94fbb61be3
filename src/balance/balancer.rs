//! Load balancer trait

/// Picks one address of a service per call
pub trait LoadBalancer: Send + Sync {
    /// Select the next server address, or `None` when the service has no nodes
    fn get_server(&self) -> Option<String>;

    /// Name of the service this balancer resolves
    fn service(&self) -> &str;

    /// Return the strategy name (for logging)
    fn strategy_name(&self) -> &'static str;
}
