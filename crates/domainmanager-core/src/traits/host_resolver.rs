// # Host Resolver Trait
//
// Resolves a node hostname into the addresses that get published.
//
// The system resolver is the default; tests and embedders can plug in
// their own lookup (static tables, a cluster API, ...).

use async_trait::async_trait;
use std::net::IpAddr;
use tracing::debug;

/// Trait for hostname → address lookups
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Resolve `hostname` to its addresses
    ///
    /// An empty result is not an error here; the caller decides what an
    /// empty address list means.
    async fn resolve(&self, hostname: &str) -> Result<Vec<IpAddr>, crate::Error>;
}

/// Resolver backed by the operating system (`getaddrinfo`)
#[derive(Debug, Clone, Default)]
pub struct SystemHostResolver;

impl SystemHostResolver {
    /// Create a system resolver
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl HostResolver for SystemHostResolver {
    async fn resolve(&self, hostname: &str) -> Result<Vec<IpAddr>, crate::Error> {
        // Port is required by lookup_host and ignored
        let addrs = tokio::net::lookup_host((hostname, 0))
            .await
            .map_err(|e| {
                crate::Error::address_resolution(format!("lookup of {} failed: {}", hostname, e))
            })?;

        let mut ips: Vec<IpAddr> = addrs.map(|addr| addr.ip()).collect();
        ips.sort();
        ips.dedup();

        debug!(hostname, count = ips.len(), "Resolved hostname");
        Ok(ips)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_system_resolver_literal_address() {
        let resolver = SystemHostResolver::new();
        let ips = resolver.resolve("127.0.0.1").await.unwrap();
        assert_eq!(ips, vec![IpAddr::from([127, 0, 0, 1])]);
    }
}
