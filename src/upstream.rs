//! Rewrites logical `lb://service/...` URLs into concrete node URLs

use std::sync::Arc;
use url::Url;

use crate::balance::{BalanceError, BalancerSet};

/// Scheme marking a URL whose host is a service name
pub const LB_SCHEME: &str = "lb";

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("URL has no service name: {0}")]
    MissingService(String),

    #[error("No server available for service '{0}'")]
    NoServer(String),

    #[error(transparent)]
    Balance(#[from] BalanceError),
}

/// Resolves logical URLs through a shared [`BalancerSet`]
#[derive(Clone)]
pub struct UpstreamResolver {
    balancers: Arc<BalancerSet>,
}

impl UpstreamResolver {
    pub fn new(balancers: Arc<BalancerSet>) -> Self {
        Self { balancers }
    }

    /// Pick a server address for a bare service name
    pub fn server_for(&self, service: &str) -> Result<String, ResolveError> {
        self.balancers
            .get_server(service)?
            .ok_or_else(|| ResolveError::NoServer(service.to_string()))
    }

    /// Resolve `lb://service/path?query#fragment` to `proto://ip:port/path?query#fragment`
    ///
    /// URLs with any other scheme are returned unchanged.
    pub fn resolve(&self, logical: &str) -> Result<String, ResolveError> {
        let url = Url::parse(logical)?;
        if url.scheme() != LB_SCHEME {
            return Ok(logical.to_string());
        }

        let service = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ResolveError::MissingService(logical.to_string()))?;

        let server = self.server_for(service)?;
        let mut resolved = format!("{}{}", server, url.path());
        if let Some(query) = url.query() {
            resolved.push('?');
            resolved.push_str(query);
        }
        if let Some(fragment) = url.fragment() {
            resolved.push('#');
            resolved.push_str(fragment);
        }

        tracing::trace!(logical = %logical, resolved = %resolved, "Resolved upstream URL");
        Ok(resolved)
    }
}
