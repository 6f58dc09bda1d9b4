//! Node state cache
//!
//! Process-lifetime table of [`NodeRecord`]s keyed by node name. The cache
//! only holds state and computes claim deltas; reconciliation side effects
//! are driven by [`crate::engine::DomainManager`].
//!
//! Every mutating method updates the stored record *before* returning the
//! delta, so reconciliations triggered from that delta (in particular
//! grouped union recomputation) observe the new state.

use crate::annotations::{ClaimDelta, ClaimSet};
use crate::traits::RecordType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Addresses of a node, split by family
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSet {
    /// IPv4 addresses (published as A records)
    pub v4: BTreeSet<Ipv4Addr>,
    /// IPv6 addresses (published as AAAA records)
    pub v6: BTreeSet<Ipv6Addr>,
}

impl AddressSet {
    /// Split a list of addresses by family
    pub fn from_addrs<'a, I>(addrs: I) -> Self
    where
        I: IntoIterator<Item = &'a IpAddr>,
    {
        let mut set = Self::default();
        for addr in addrs {
            match addr {
                IpAddr::V4(v4) => {
                    set.v4.insert(*v4);
                }
                IpAddr::V6(v6) => {
                    set.v6.insert(*v6);
                }
            }
        }
        set
    }

    /// Addresses of the family matching `record_type`
    pub fn for_type(&self, record_type: RecordType) -> BTreeSet<IpAddr> {
        match record_type {
            RecordType::A => self.v4.iter().copied().map(IpAddr::V4).collect(),
            RecordType::Aaaa => self.v6.iter().copied().map(IpAddr::V6).collect(),
        }
    }

    /// Check if there are no addresses at all
    pub fn is_empty(&self) -> bool {
        self.v4.is_empty() && self.v6.is_empty()
    }

    /// Total number of addresses
    pub fn len(&self) -> usize {
        self.v4.len() + self.v6.len()
    }
}

/// Cached state of one managed node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Unique node name
    pub id: String,
    /// Hostname the addresses were resolved from
    pub hostname: String,
    /// Published addresses
    pub addresses: AddressSet,
    /// Claims from the most recent annotation snapshot
    pub claims: ClaimSet,
    /// When the node was last observed
    pub observed_at: DateTime<Utc>,
}

/// Table of managed nodes
#[derive(Debug, Clone, Default)]
pub struct NodeStateCache {
    nodes: BTreeMap<String, NodeRecord>,
}

impl NodeStateCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a node
    pub fn get(&self, id: &str) -> Option<&NodeRecord> {
        self.nodes.get(id)
    }

    /// Check whether a node is cached
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Iterate nodes in name order
    pub fn iter(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.values()
    }

    /// Number of cached nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Admit a new node; every claim is reported as added
    ///
    /// If the node already exists this behaves like [`Self::update_claims`].
    pub fn admit(
        &mut self,
        id: &str,
        hostname: &str,
        addresses: AddressSet,
        claims: ClaimSet,
    ) -> ClaimDelta {
        if self.nodes.contains_key(id) {
            return self.update_claims(id, claims).unwrap_or_default();
        }

        let delta = ClaimSet::new().diff(&claims);
        self.nodes.insert(
            id.to_string(),
            NodeRecord {
                id: id.to_string(),
                hostname: hostname.to_string(),
                addresses,
                claims,
                observed_at: Utc::now(),
            },
        );
        delta
    }

    /// Replace the claims of a known node, returning what changed
    ///
    /// Returns `None` for unknown nodes.
    pub fn update_claims(&mut self, id: &str, claims: ClaimSet) -> Option<ClaimDelta> {
        let record = self.nodes.get_mut(id)?;
        let delta = record.claims.diff(&claims);
        record.claims = claims;
        record.observed_at = Utc::now();
        Some(delta)
    }

    /// Replace the addresses of a known node
    ///
    /// Returns `false` for unknown nodes.
    pub fn set_addresses(&mut self, id: &str, addresses: AddressSet) -> bool {
        match self.nodes.get_mut(id) {
            Some(record) => {
                record.addresses = addresses;
                true
            }
            None => false,
        }
    }

    /// Record the hostname a known node currently resolves from
    ///
    /// Returns `true` when the stored hostname changed.
    pub fn set_hostname(&mut self, id: &str, hostname: &str) -> bool {
        match self.nodes.get_mut(id) {
            Some(record) if record.hostname != hostname => {
                record.hostname = hostname.to_string();
                true
            }
            _ => false,
        }
    }

    /// Clear all claims of a node, keeping it cached
    ///
    /// Every held claim is reported as removed. The node's addresses stay
    /// available so per-address deletions can still be issued, while
    /// grouped unions already exclude it.
    pub fn retire_claims(&mut self, id: &str) -> Option<ClaimDelta> {
        self.update_claims(id, ClaimSet::new())
    }

    /// Drop a node from the table
    pub fn forget(&mut self, id: &str) -> Option<NodeRecord> {
        self.nodes.remove(id)
    }

    /// Union of addresses of `record_type` over every node currently
    /// claiming `domain` with presence
    pub fn union_addresses(&self, domain: &str, record_type: RecordType) -> BTreeSet<IpAddr> {
        self.nodes
            .values()
            .filter(|record| record.claims.claims_present(domain))
            .flat_map(|record| record.addresses.for_type(record_type))
            .collect()
    }

    /// Names of nodes currently claiming `domain` with presence
    pub fn claimants(&self, domain: &str) -> Vec<String> {
        self.nodes
            .values()
            .filter(|record| record.claims.claims_present(domain))
            .map(|record| record.id.clone())
            .collect()
    }
}
