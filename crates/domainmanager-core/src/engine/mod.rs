//! Core domain manager
//!
//! The DomainManager is responsible for:
//! - Consuming typed node events from a NodeEventSource
//! - Keeping the NodeStateCache in sync with observed annotations
//! - Driving the ReconciliationEngine for every claim that changed
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ NodeEventSource │─── NodeEvent ───┐
//! └─────────────────┘                 │
//!                                     ▼
//!                            ┌────────────────┐
//!                            │ DomainManager  │
//!                            └────────────────┘
//!                                     │
//!         ┌───────────────────────────┼───────────────────────────┐
//!         │                           │                           │
//!         ▼                           ▼                           ▼
//! ┌────────────────┐        ┌──────────────────┐         ┌─────────────┐
//! │ NodeStateCache │        │ Reconciliation   │         │   Events    │
//! │ (claim delta)  │        │ Engine → Handler │         │  (notify)   │
//! └────────────────┘        └──────────────────┘         └─────────────┘
//! ```
//!
//! ## Event Flow
//!
//! 1. Node event received
//! 2. Annotations parsed into a claim set, addresses derived
//! 3. Cache updated, claim delta computed
//! 4. Removed claims reconciled with `present = false`, added claims with
//!    their own presence
//! 5. Events emitted for monitoring/logging
//!
//! Events are processed strictly one after another, which serialises every
//! reconciliation touching the same domain.

mod events;
mod reconcile;

pub use events::{ManagerEvent, MutationKind};
pub use reconcile::{ReconcileOutcome, ReconciliationEngine};

use crate::annotations::{ClaimDelta, parse_claims};
use crate::config::{DomainManagerConfig, EngineConfig};
use crate::error::{Error, Result};
use crate::node_cache::{AddressSet, NodeRecord, NodeStateCache};
use crate::resolver::ProviderResolver;
use crate::traits::{DomainHandler, HostResolver, NodeEvent, NodeEventSource, NodeSnapshot};
use events::emit;
use std::collections::BTreeMap;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

/// Core domain manager
///
/// Owns every cache of the system (node table, zone bindings) as instance
/// state; independent managers never share anything.
///
/// ## Lifecycle
///
/// 1. Create with [`DomainManager::new()`]
/// 2. Start with [`DomainManager::run()`] or feed events manually with
///    [`DomainManager::handle_event()`]
/// 3. Manager runs until a shutdown signal is received or the source ends
pub struct DomainManager {
    /// Reconciliation engine, owning the responsibility resolver
    engine: ReconciliationEngine,

    /// Known nodes and their claims
    nodes: NodeStateCache,

    /// Hostname lookups for nodes without explicit addresses
    host_resolver: Box<dyn HostResolver>,

    /// Engine settings
    config: EngineConfig,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<ManagerEvent>,
}

impl DomainManager {
    /// Create a new domain manager
    ///
    /// # Parameters
    ///
    /// - `handlers`: Domain handlers in registration order
    /// - `host_resolver`: Resolver used for node hostnames
    /// - `config`: Manager configuration
    ///
    /// # Returns
    ///
    /// A tuple of (manager, event_receiver) where event_receiver yields manager events
    pub fn new(
        handlers: Vec<Arc<dyn DomainHandler>>,
        host_resolver: Box<dyn HostResolver>,
        config: DomainManagerConfig,
    ) -> Result<(Self, mpsc::Receiver<ManagerEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.engine.event_channel_capacity);
        let resolver = ProviderResolver::new(handlers);

        let manager = Self {
            engine: ReconciliationEngine::new(resolver, tx.clone()),
            nodes: NodeStateCache::new(),
            host_resolver,
            config: config.engine,
            event_tx: tx,
        };

        Ok((manager, rx))
    }

    /// Look up a cached node
    pub fn node(&self, id: &str) -> Option<&NodeRecord> {
        self.nodes.get(id)
    }

    /// All cached nodes
    pub fn nodes(&self) -> &NodeStateCache {
        &self.nodes
    }

    /// The responsibility resolver and its zone table
    pub fn resolver(&self) -> &ProviderResolver {
        self.engine.resolver()
    }

    /// Run the manager until SIGINT or the end of the event stream
    pub async fn run(&mut self, source: &dyn NodeEventSource) -> Result<()> {
        self.run_internal(source, None).await
    }

    /// Run the manager with a controlled shutdown signal
    ///
    /// Dropping the sender also counts as a shutdown request.
    pub async fn run_with_shutdown(
        &mut self,
        source: &dyn NodeEventSource,
        shutdown_rx: Option<oneshot::Receiver<()>>,
    ) -> Result<()> {
        self.run_internal(source, shutdown_rx).await
    }

    async fn run_internal(
        &mut self,
        source: &dyn NodeEventSource,
        shutdown_rx: Option<oneshot::Receiver<()>>,
    ) -> Result<()> {
        emit(
            &self.event_tx,
            ManagerEvent::Started {
                handlers_count: self.engine.resolver().handler_count(),
            },
        );

        let mut shutdown: Pin<Box<dyn Future<Output = &'static str> + Send>> = match shutdown_rx {
            Some(rx) => Box::pin(async move {
                let _ = rx.await;
                "Shutdown signal"
            }),
            None => Box::pin(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => "Shutdown signal",
                    Err(_) => "Signal handler failed",
                }
            }),
        };

        let mut events = source.watch();

        let reason = loop {
            tokio::select! {
                // Stop intake first; the event in progress always completes
                biased;

                reason = &mut shutdown => {
                    info!("Shutdown signal received");
                    break reason;
                }

                event = events.next() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        info!("Node event stream ended");
                        break "Event stream ended";
                    }
                },
            }
        };

        emit(
            &self.event_tx,
            ManagerEvent::Stopped {
                reason: reason.to_string(),
            },
        );
        info!(nodes = self.nodes.len(), "Domain manager stopped");

        Ok(())
    }

    /// Apply one node event
    ///
    /// Never fails: every error is scoped to the node, domain or mutation
    /// it concerns and reported through logs and [`ManagerEvent`]s.
    pub async fn handle_event(&mut self, event: NodeEvent) {
        match event {
            NodeEvent::Added { node } | NodeEvent::Updated { node } => {
                self.upsert_snapshot(&node).await;
            }
            NodeEvent::Removed { name } => {
                self.remove(&name).await;
            }
        }
    }

    /// Upsert a node from an event snapshot
    pub async fn upsert_snapshot(&mut self, node: &NodeSnapshot) -> Vec<ReconcileOutcome> {
        let hostname = node.hostname(&self.config.hostname_label);
        self.upsert(&node.name, &hostname, &node.addresses, &node.annotations)
            .await
    }

    /// Insert or update a node and reconcile every claim that changed
    ///
    /// # Parameters
    ///
    /// - `node_id`: Unique node name
    /// - `hostname`: Hostname to resolve when `addresses` is empty
    /// - `addresses`: Addresses known to the event source, may be empty
    /// - `annotations`: Raw node annotations
    ///
    /// # Returns
    ///
    /// One outcome per reconciliation that was run. Identical repeated
    /// calls return an empty list and issue no provider calls.
    pub async fn upsert(
        &mut self,
        node_id: &str,
        hostname: &str,
        addresses: &[IpAddr],
        annotations: &BTreeMap<String, String>,
    ) -> Vec<ReconcileOutcome> {
        let claims = parse_claims(annotations);
        let resolved = self.derive_addresses(hostname, addresses).await;

        let Some(current) = self.nodes.get(node_id).map(|n| n.addresses.clone()) else {
            let addresses = match resolved {
                Ok(addresses) => addresses,
                Err(e) => {
                    warn!(node = node_id, hostname, error = %e, "DNS lookup failed, node not admitted");
                    emit(
                        &self.event_tx,
                        ManagerEvent::NodeRejected {
                            node: node_id.to_string(),
                            error: e.to_string(),
                        },
                    );
                    return Vec::new();
                }
            };

            info!(
                node = node_id,
                v4 = addresses.v4.len(),
                v6 = addresses.v6.len(),
                claims = claims.len(),
                "Creating cache entry"
            );
            emit(
                &self.event_tx,
                ManagerEvent::NodeAdmitted {
                    node: node_id.to_string(),
                    claims_count: claims.len(),
                },
            );

            let delta = self.nodes.admit(node_id, hostname, addresses, claims);
            return self.apply_delta(node_id, delta).await;
        };

        let mut outcomes = Vec::new();
        match resolved {
            Ok(addresses) if addresses != current => {
                info!(node = node_id, "Node addresses changed, re-publishing claims");
                // Retire under the old addresses, then claim again under the new ones
                if let Some(retired) = self.nodes.retire_claims(node_id) {
                    outcomes.extend(self.apply_delta(node_id, retired).await);
                }
                self.nodes.set_addresses(node_id, addresses);
            }
            Ok(_) => {}
            Err(e) => {
                warn!(node = node_id, hostname, error = %e, "DNS lookup failed, keeping previous addresses");
            }
        }

        if self.nodes.set_hostname(node_id, hostname) {
            debug!(node = node_id, hostname, "Node hostname changed");
        }

        if let Some(delta) = self.nodes.update_claims(node_id, claims) {
            outcomes.extend(self.apply_delta(node_id, delta).await);
        }
        outcomes
    }

    /// Retire every claim of a node, then drop it from the cache
    pub async fn remove(&mut self, node_id: &str) -> Vec<ReconcileOutcome> {
        let Some(retired) = self.nodes.retire_claims(node_id) else {
            info!(node = node_id, "Node already gone, not deleting any entries");
            return Vec::new();
        };

        info!(node = node_id, claims = retired.removed.len(), "Deleting node");
        let outcomes = self.apply_delta(node_id, retired).await;

        self.nodes.forget(node_id);
        emit(
            &self.event_tx,
            ManagerEvent::NodeRetired {
                node: node_id.to_string(),
            },
        );
        outcomes
    }

    /// Reconcile every claim in `delta`, removals first
    async fn apply_delta(&self, node_id: &str, delta: ClaimDelta) -> Vec<ReconcileOutcome> {
        if delta.is_empty() {
            debug!(node = node_id, "Claims unchanged");
            return Vec::new();
        }

        emit(
            &self.event_tx,
            ManagerEvent::ClaimsChanged {
                node: node_id.to_string(),
                added: delta.added.iter().map(|c| c.domain.clone()).collect(),
                removed: delta.removed.iter().map(|c| c.domain.clone()).collect(),
            },
        );

        let mut outcomes = Vec::with_capacity(delta.added.len() + delta.removed.len());
        for claim in &delta.removed {
            outcomes.push(self.engine.reconcile(&self.nodes, node_id, claim, false).await);
        }
        for claim in &delta.added {
            outcomes.push(
                self.engine
                    .reconcile(&self.nodes, node_id, claim, claim.present)
                    .await,
            );
        }
        outcomes
    }

    /// Use the event's addresses, or resolve the hostname
    async fn derive_addresses(&self, hostname: &str, addresses: &[IpAddr]) -> Result<AddressSet> {
        if !addresses.is_empty() {
            return Ok(AddressSet::from_addrs(addresses));
        }

        let resolved = self.host_resolver.resolve(hostname).await?;
        if resolved.is_empty() {
            return Err(Error::address_resolution(format!(
                "{} resolved to no addresses",
                hostname
            )));
        }
        Ok(AddressSet::from_addrs(&resolved))
    }
}
