// # Node Event Source Trait
//
// Defines the interface for delivering node lifecycle events.
//
// Sources are expected to deliver an initial listing followed by ordered
// watch events, and to apply the management gate filter themselves (see
// [`NodeSnapshot::is_managed`]). Payloads are validated once at this
// boundary and reach the manager as typed [`NodeEvent`] values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::pin::Pin;
use tokio_stream::Stream;

/// Default label gating which nodes are managed
pub const DEFAULT_GATE_LABEL: &str = "domainmanager.deinstapel.de";

/// Default value of the gate label
pub const DEFAULT_GATE_VALUE: &str = "yes";

/// Default label holding the resolvable hostname of a node
pub const DEFAULT_HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

/// Observed state of one node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    /// Unique node name
    pub name: String,
    /// Node labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Node annotations
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Addresses already known to the source; empty means "resolve the hostname"
    #[serde(default)]
    pub addresses: Vec<IpAddr>,
}

impl NodeSnapshot {
    /// Create a snapshot with only a name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Add a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add an annotation
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Add a known address
    pub fn with_address(mut self, addr: IpAddr) -> Self {
        self.addresses.push(addr);
        self
    }

    /// Hostname used for address resolution, falling back to the node name
    pub fn hostname(&self, hostname_label: &str) -> String {
        self.labels
            .get(hostname_label)
            .filter(|value| !value.is_empty())
            .cloned()
            .unwrap_or_else(|| self.name.clone())
    }

    /// Whether the node carries the management gate label
    pub fn is_managed(&self, gate_label: &str, gate_value: &str) -> bool {
        self.labels
            .get(gate_label)
            .is_some_and(|value| value == gate_value)
    }
}

/// Typed node lifecycle event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeEvent {
    /// Node appeared (initial listing or watch add)
    Added {
        /// Observed node state
        node: NodeSnapshot,
    },
    /// Node changed
    Updated {
        /// Observed node state
        node: NodeSnapshot,
    },
    /// Node disappeared
    Removed {
        /// Node name
        name: String,
    },
}

impl NodeEvent {
    /// Name of the node this event concerns
    pub fn node_name(&self) -> &str {
        match self {
            NodeEvent::Added { node } | NodeEvent::Updated { node } => &node.name,
            NodeEvent::Removed { name } => name,
        }
    }
}

/// Trait for node event sources
///
/// # Thread Safety
///
/// Implementations must be thread-safe and usable across async tasks.
pub trait NodeEventSource: Send + Sync {
    /// Stream of node events, in delivery order
    ///
    /// The stream ending is treated as a clean stop by the manager.
    fn watch(&self) -> Pin<Box<dyn Stream<Item = NodeEvent> + Send + 'static>>;
}
