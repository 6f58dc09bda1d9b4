//! Reconciliation of one (node, domain) pair against its provider
//!
//! ## Flow
//!
//! 1. Resolve the responsible handler; unmanaged domains are skipped.
//! 2. Fetch the provider's existing records once. A failed fetch aborts
//!    the reconciliation before any mutation.
//! 3. Branch on the handler shape:
//!    - **Single**: create/delete one record per node address, skipping
//!      what is already satisfied.
//!    - **Grouped**: recompute the union of addresses of every node that
//!      currently claims the domain, per family, and replace the record
//!      set with it (or delete the set when the union is empty).
//!
//! Failures never propagate: each one is logged, emitted as a
//! [`ManagerEvent`] and counted in the returned [`ReconcileOutcome`].

use super::events::{ManagerEvent, MutationKind, emit};
use crate::annotations::DomainClaim;
use crate::node_cache::{NodeRecord, NodeStateCache};
use crate::resolver::{ProviderResolver, Resolution};
use crate::traits::{
    DomainTarget, GroupedRecordApi, HandlerApi, HandlerShape, ProviderRecord, RecordType,
    SingleRecordApi,
};
use std::collections::BTreeSet;
use std::net::IpAddr;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Result of one reconciliation, for logging and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The node is not in the cache
    UnknownNode,
    /// No handler is responsible for the domain
    Unmanaged,
    /// Existing records could not be fetched; nothing was mutated
    FetchFailed {
        /// Fetch error message
        error: String,
    },
    /// Mutations were attempted (possibly zero)
    Applied {
        /// Shape of the responsible handler
        shape: HandlerShape,
        /// Mutations that succeeded
        succeeded: usize,
        /// Mutations that failed
        failed: usize,
    },
}

impl ReconcileOutcome {
    /// Number of mutation calls issued to the provider
    pub fn mutations_issued(&self) -> usize {
        match self {
            ReconcileOutcome::Applied {
                succeeded, failed, ..
            } => succeeded + failed,
            _ => 0,
        }
    }
}

#[derive(Default)]
struct Tally {
    succeeded: usize,
    failed: usize,
}

/// Diffs desired state against provider state and issues mutations
pub struct ReconciliationEngine {
    resolver: ProviderResolver,
    event_tx: mpsc::Sender<ManagerEvent>,
}

impl ReconciliationEngine {
    /// Create an engine around a resolver
    pub fn new(resolver: ProviderResolver, event_tx: mpsc::Sender<ManagerEvent>) -> Self {
        Self { resolver, event_tx }
    }

    /// Access the responsibility resolver
    pub fn resolver(&self) -> &ProviderResolver {
        &self.resolver
    }

    /// Reconcile `claim` for the node `node_id` as found in `nodes`
    ///
    /// `present` selects create vs delete for single-record handlers.
    /// Grouped handlers always converge to the union derived from `nodes`,
    /// so the cache must already reflect the node's new claims.
    pub async fn reconcile(
        &self,
        nodes: &NodeStateCache,
        node_id: &str,
        claim: &DomainClaim,
        present: bool,
    ) -> ReconcileOutcome {
        let Some(node) = nodes.get(node_id) else {
            warn!(node = node_id, domain = %claim.domain, "Reconcile requested for unknown node");
            return ReconcileOutcome::UnknownNode;
        };

        let (handler, target) = match self.resolver.resolve(&claim.domain, &claim.labels).await {
            Resolution::Responsible { handler, target } => (handler, target),
            Resolution::NotResponsible => {
                debug!(node = node_id, domain = %claim.domain, "Domain not managed, skipping");
                emit(
                    &self.event_tx,
                    ManagerEvent::DomainUnmanaged {
                        node: node_id.to_string(),
                        domain: claim.domain.clone(),
                    },
                );
                return ReconcileOutcome::Unmanaged;
            }
        };

        info!(
            node = node_id,
            domain = %claim.domain,
            handler = handler.name(),
            present,
            "Checking domain"
        );

        // Records of other nodes are included; they are needed to keep
        // single-record creates idempotent and to diff grouped sets.
        let existing = match handler.existing_records(&target).await {
            Ok(records) => records,
            Err(e) => {
                warn!(
                    node = node_id,
                    domain = %claim.domain,
                    handler = handler.name(),
                    error = %e,
                    "Failed to get existing DNS records"
                );
                emit(
                    &self.event_tx,
                    ManagerEvent::ReconcileAborted {
                        node: node_id.to_string(),
                        domain: claim.domain.clone(),
                        error: e.to_string(),
                    },
                );
                return ReconcileOutcome::FetchFailed {
                    error: e.to_string(),
                };
            }
        };

        let api = handler.api();
        let shape = api.shape();
        let tally = match api {
            HandlerApi::Single(single) => {
                self.reconcile_single(single, node, &target, present, &existing)
                    .await
            }
            HandlerApi::Grouped(grouped) => {
                self.reconcile_grouped(grouped, nodes, node, &target, &existing)
                    .await
            }
        };

        ReconcileOutcome::Applied {
            shape,
            succeeded: tally.succeeded,
            failed: tally.failed,
        }
    }

    async fn reconcile_single(
        &self,
        api: &dyn SingleRecordApi,
        node: &NodeRecord,
        target: &DomainTarget,
        present: bool,
        existing: &[ProviderRecord],
    ) -> Tally {
        let mut tally = Tally::default();

        for record_type in RecordType::ALL {
            for addr in node.addresses.for_type(record_type) {
                let published = existing
                    .iter()
                    .any(|record| record.matches(record_type, &addr));

                let (kind, result) = match (present, published) {
                    (true, false) => (
                        MutationKind::Create,
                        api.ensure_single_record(target, addr, record_type, existing)
                            .await,
                    ),
                    (false, true) => (
                        MutationKind::Delete,
                        api.delete_single_record(target, addr, record_type, existing)
                            .await,
                    ),
                    // Already converged
                    _ => continue,
                };

                self.record_mutation(&mut tally, node, target, record_type, kind, result, || {
                    addr.to_string()
                });
            }
        }

        tally
    }

    async fn reconcile_grouped(
        &self,
        api: &dyn GroupedRecordApi,
        nodes: &NodeStateCache,
        node: &NodeRecord,
        target: &DomainTarget,
        existing: &[ProviderRecord],
    ) -> Tally {
        let mut tally = Tally::default();

        for record_type in RecordType::ALL {
            let desired = nodes.union_addresses(&target.domain, record_type);
            let published = published_addresses(existing, record_type);
            let has_records = existing
                .iter()
                .any(|record| record.record_type == record_type);

            let (kind, result) = if !desired.is_empty() {
                if desired == published {
                    debug!(
                        domain = %target.domain,
                        %record_type,
                        "Record set already matches claimants"
                    );
                    continue;
                }
                (
                    MutationKind::ReplaceSet,
                    api.ensure_grouped_record(target, &desired, record_type, existing)
                        .await,
                )
            } else if has_records {
                // Last claimant gone: delete instead of upserting an empty set
                (
                    MutationKind::DeleteSet,
                    api.delete_grouped_record(target, &published, record_type, existing)
                        .await,
                )
            } else {
                continue;
            };

            self.record_mutation(&mut tally, node, target, record_type, kind, result, || {
                match kind {
                    MutationKind::DeleteSet => format_addrs(&published),
                    _ => format_addrs(&desired),
                }
            });
        }

        tally
    }

    #[allow(clippy::too_many_arguments)]
    fn record_mutation(
        &self,
        tally: &mut Tally,
        node: &NodeRecord,
        target: &DomainTarget,
        record_type: RecordType,
        kind: MutationKind,
        result: crate::Result<()>,
        describe: impl FnOnce() -> String,
    ) {
        match result {
            Ok(()) => {
                tally.succeeded += 1;
                info!(
                    node = %node.id,
                    domain = %target.domain,
                    %record_type,
                    %kind,
                    addresses = %describe(),
                    "DNS mutation applied"
                );
                emit(
                    &self.event_tx,
                    ManagerEvent::MutationApplied {
                        node: node.id.clone(),
                        domain: target.domain.clone(),
                        record_type,
                        kind,
                    },
                );
            }
            Err(e) => {
                tally.failed += 1;
                warn!(
                    node = %node.id,
                    domain = %target.domain,
                    %record_type,
                    %kind,
                    addresses = %describe(),
                    error = %e,
                    "DNS mutation failed"
                );
                emit(
                    &self.event_tx,
                    ManagerEvent::MutationFailed {
                        node: node.id.clone(),
                        domain: target.domain.clone(),
                        record_type,
                        kind,
                        error: e.to_string(),
                    },
                );
            }
        }
    }
}

/// Addresses of `record_type` in a provider snapshot; unparsable values are skipped
fn published_addresses(existing: &[ProviderRecord], record_type: RecordType) -> BTreeSet<IpAddr> {
    existing
        .iter()
        .filter(|record| record.record_type == record_type)
        .filter_map(|record| match record.value.parse::<IpAddr>() {
            Ok(addr) => Some(addr),
            Err(_) => {
                warn!(record = %record.id, value = %record.value, "Ignoring unparsable record value");
                None
            }
        })
        .collect()
}

fn format_addrs(addrs: &BTreeSet<IpAddr>) -> String {
    addrs
        .iter()
        .map(IpAddr::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
