//! Monitoring events emitted by the manager

use crate::traits::RecordType;
use std::fmt;
use tokio::sync::mpsc;
use tracing::warn;

/// Kind of provider mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    /// Single record create
    Create,
    /// Single record delete
    Delete,
    /// Grouped record set replace (upsert)
    ReplaceSet,
    /// Grouped record set delete
    DeleteSet,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MutationKind::Create => "create",
            MutationKind::Delete => "delete",
            MutationKind::ReplaceSet => "replace-set",
            MutationKind::DeleteSet => "delete-set",
        };
        f.write_str(name)
    }
}

/// Events emitted by the DomainManager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
    /// Manager started consuming events
    Started {
        handlers_count: usize,
    },

    /// Manager stopped
    Stopped {
        reason: String,
    },

    /// Node entered the cache
    NodeAdmitted {
        node: String,
        claims_count: usize,
    },

    /// Node was kept out of the cache (address resolution failed)
    NodeRejected {
        node: String,
        error: String,
    },

    /// Node left the cache after its claims were retired
    NodeRetired {
        node: String,
    },

    /// Claim set of a node changed
    ClaimsChanged {
        node: String,
        added: Vec<String>,
        removed: Vec<String>,
    },

    /// Domain has no responsible handler, skipped
    DomainUnmanaged {
        node: String,
        domain: String,
    },

    /// Existing records could not be fetched, nothing was mutated
    ReconcileAborted {
        node: String,
        domain: String,
        error: String,
    },

    /// Provider mutation succeeded
    MutationApplied {
        node: String,
        domain: String,
        record_type: RecordType,
        kind: MutationKind,
    },

    /// Provider mutation failed
    MutationFailed {
        node: String,
        domain: String,
        record_type: RecordType,
        kind: MutationKind,
        error: String,
    },
}

/// Send an event without ever blocking the caller
pub(crate) fn emit(tx: &mpsc::Sender<ManagerEvent>, event: ManagerEvent) {
    if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(event) {
        warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
    }
}
