// # Domain Handler Trait
//
// Defines the contract every DNS provider adapter must satisfy.
//
// ## Shapes
//
// Providers expose one of two incompatible update models:
//
// - **Single**: independent per-address create/delete (e.g. Cloudflare)
// - **Grouped**: only "replace the whole record set of type T for domain D"
//   (e.g. Route53 resource record sets)
//
// The shape is a tagged variant returned by [`DomainHandler::api`], so the
// engine's branch over it is checked exhaustively at compile time.
//
// ## Implementations
//
// - In-memory: `crate::handlers::MemoryDomainHandler`
// - Cloudflare: `domainmanager-provider-cloudflare` crate
// - Route53: `domainmanager-provider-route53` crate

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

/// DNS record type managed by this system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecordType {
    /// IPv4 address record
    A,
    /// IPv6 address record
    #[serde(rename = "AAAA")]
    Aaaa,
}

impl RecordType {
    /// Both managed record types, A first
    pub const ALL: [RecordType; 2] = [RecordType::A, RecordType::Aaaa];

    /// Wire name of the record type
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
        }
    }

    /// Record type for an address family
    pub fn for_addr(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => RecordType::A,
            IpAddr::V6(_) => RecordType::Aaaa,
        }
    }

    /// Parse a provider-reported type name; unmanaged types yield `None`
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "A" => Some(RecordType::A),
            "AAAA" => Some(RecordType::Aaaa),
            _ => None,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only snapshot of one record as reported by a provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderRecord {
    /// Provider-specific record id (opaque)
    pub id: String,
    /// Record type
    pub record_type: RecordType,
    /// Address text as reported by the provider
    pub value: String,
}

impl ProviderRecord {
    /// Check whether this record holds `addr` with type `record_type`
    pub fn matches(&self, record_type: RecordType, addr: &IpAddr) -> bool {
        self.record_type == record_type
            && self
                .value
                .parse::<IpAddr>()
                .map(|value| value == *addr)
                .unwrap_or_else(|_| self.value == addr.to_string())
    }
}

/// The domain an operation targets, with the memoized zone binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainTarget {
    /// Full domain name
    pub domain: String,
    /// Dot-separated labels of the domain
    pub labels: Vec<String>,
    /// Last two labels, the key the responsibility cache is indexed by
    pub zone_key: String,
    /// Provider-internal zone identifier returned by the responsibility check
    pub zone_id: String,
}

/// Mutation primitives of a single-record provider
#[async_trait]
pub trait SingleRecordApi: Send + Sync {
    /// Create a record for `addr` unless `existing` already holds it
    async fn ensure_single_record(
        &self,
        target: &DomainTarget,
        addr: IpAddr,
        record_type: RecordType,
        existing: &[ProviderRecord],
    ) -> Result<(), crate::Error>;

    /// Delete the record holding `addr` if `existing` contains one
    async fn delete_single_record(
        &self,
        target: &DomainTarget,
        addr: IpAddr,
        record_type: RecordType,
        existing: &[ProviderRecord],
    ) -> Result<(), crate::Error>;
}

/// Mutation primitives of a grouped-record provider
#[async_trait]
pub trait GroupedRecordApi: Send + Sync {
    /// Replace the whole record set of `record_type` with exactly `addrs`
    async fn ensure_grouped_record(
        &self,
        target: &DomainTarget,
        addrs: &BTreeSet<IpAddr>,
        record_type: RecordType,
        existing: &[ProviderRecord],
    ) -> Result<(), crate::Error>;

    /// Delete the record set of `record_type`, currently holding `addrs`
    async fn delete_grouped_record(
        &self,
        target: &DomainTarget,
        addrs: &BTreeSet<IpAddr>,
        record_type: RecordType,
        existing: &[ProviderRecord],
    ) -> Result<(), crate::Error>;
}

/// Update model of a handler, with its mutation primitives
pub enum HandlerApi<'a> {
    /// Per-address create/delete
    Single(&'a dyn SingleRecordApi),
    /// Whole record set replacement
    Grouped(&'a dyn GroupedRecordApi),
}

impl HandlerApi<'_> {
    /// Shape tag without the primitives
    pub fn shape(&self) -> HandlerShape {
        match self {
            HandlerApi::Single(_) => HandlerShape::Single,
            HandlerApi::Grouped(_) => HandlerShape::Grouped,
        }
    }
}

/// Shape tag, used in configuration and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerShape {
    /// Per-address create/delete
    #[default]
    Single,
    /// Whole record set replacement
    Grouped,
}

impl fmt::Display for HandlerShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerShape::Single => f.write_str("single"),
            HandlerShape::Grouped => f.write_str("grouped"),
        }
    }
}

/// Trait for DNS provider adapters
///
/// Adapters are stateless with respect to reconciliation: they never decide
/// whether a mutation is needed beyond the `existing` snapshot they are
/// handed, never retry, and never cache zone ids themselves (the resolver
/// memoizes them and passes them back in [`DomainTarget`]).
///
/// # Thread Safety
///
/// Implementations must be thread-safe and usable across async tasks.
#[async_trait]
pub trait DomainHandler: Send + Sync {
    /// Handler name for logging (e.g. "cloudflare", "memory")
    fn name(&self) -> &str;

    /// Update model and mutation primitives of this handler
    fn api(&self) -> HandlerApi<'_>;

    /// Check whether the provider's backing DNS system owns the zone of `labels`
    ///
    /// # Returns
    ///
    /// - `Ok(Some(zone_id))`: responsible, with the provider-internal zone id
    /// - `Ok(None)`: not responsible
    /// - `Err(Error)`: lookup failed; the resolver treats this as not responsible
    async fn check_if_responsible(&self, labels: &[String]) -> Result<Option<String>, crate::Error>;

    /// Fetch the A/AAAA records currently published for `target.domain`
    async fn existing_records(&self, target: &DomainTarget)
    -> Result<Vec<ProviderRecord>, crate::Error>;
}

/// Helper trait for constructing handlers from configuration
pub trait DomainHandlerFactory: Send + Sync {
    /// Create a handler instance from configuration
    fn create(
        &self,
        config: &crate::config::ProviderConfig,
    ) -> Result<std::sync::Arc<dyn DomainHandler>, crate::Error>;
}
