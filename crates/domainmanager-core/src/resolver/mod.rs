//! Responsibility resolution
//!
//! Determines which registered [`DomainHandler`] owns the zone of a domain.
//!
//! ## Rules
//!
//! - The zone key is the last two labels of the domain (`a.b.example.com`
//!   → `example.com`).
//! - Handlers are asked in registration order; the first one that claims the
//!   zone wins.
//! - A failing responsibility check counts as "not responsible".
//! - Every outcome, including "nobody is responsible", is cached for the
//!   lifetime of the resolver.

use crate::annotations::zone_key;
use crate::traits::{DomainHandler, DomainTarget};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Outcome of resolving a domain
#[derive(Clone)]
pub enum Resolution {
    /// A handler owns the zone
    Responsible {
        /// The owning handler
        handler: Arc<dyn DomainHandler>,
        /// Target carrying the memoized zone id
        target: DomainTarget,
    },
    /// No registered handler owns the zone
    NotResponsible,
}

impl std::fmt::Debug for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resolution::Responsible { handler, target } => f
                .debug_struct("Responsible")
                .field("handler", &handler.name())
                .field("target", target)
                .finish(),
            Resolution::NotResponsible => f.write_str("NotResponsible"),
        }
    }
}

/// Cached binding of a zone key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoneBinding {
    /// Bound to the handler at `handler_index` in registration order
    Bound {
        /// Index into the registered handlers
        handler_index: usize,
        /// Handler name, for logging and inspection
        handler_name: String,
        /// Provider-internal zone identifier
        zone_id: String,
    },
    /// No handler claimed the zone
    Unmanaged,
}

/// Resolves domains to responsible handlers, memoizing per zone key
pub struct ProviderResolver {
    /// Handlers in registration order
    handlers: Vec<Arc<dyn DomainHandler>>,

    /// zone key → binding; append-only
    bindings: RwLock<HashMap<String, ZoneBinding>>,
}

impl ProviderResolver {
    /// Create a resolver over handlers in registration order
    pub fn new(handlers: Vec<Arc<dyn DomainHandler>>) -> Self {
        if handlers.is_empty() {
            warn!("No domain handlers registered, every domain resolves to not responsible");
        }

        Self {
            handlers,
            bindings: RwLock::new(HashMap::new()),
        }
    }

    /// Number of registered handlers
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Resolve the responsible handler for a domain
    pub async fn resolve(&self, domain: &str, labels: &[String]) -> Resolution {
        let key = zone_key(labels);

        let cached = self.bindings.read().await.get(&key).cloned();
        let binding = match cached {
            Some(binding) => binding,
            None => {
                let binding = self.query_handlers(&key, labels).await;
                // Another resolution may have raced us; the first insert wins
                self.bindings
                    .write()
                    .await
                    .entry(key.clone())
                    .or_insert(binding)
                    .clone()
            }
        };

        match binding {
            ZoneBinding::Bound {
                handler_index,
                zone_id,
                ..
            } => match self.handlers.get(handler_index) {
                Some(handler) => Resolution::Responsible {
                    handler: Arc::clone(handler),
                    target: DomainTarget {
                        domain: domain.to_string(),
                        labels: labels.to_vec(),
                        zone_key: key,
                        zone_id,
                    },
                },
                None => Resolution::NotResponsible,
            },
            ZoneBinding::Unmanaged => Resolution::NotResponsible,
        }
    }

    /// Ask every handler in order whether it owns `key`
    async fn query_handlers(&self, key: &str, labels: &[String]) -> ZoneBinding {
        for (handler_index, handler) in self.handlers.iter().enumerate() {
            match handler.check_if_responsible(labels).await {
                Ok(Some(zone_id)) => {
                    info!(
                        zone = key,
                        handler = handler.name(),
                        zone_id = %zone_id,
                        "Resolved zone"
                    );
                    return ZoneBinding::Bound {
                        handler_index,
                        handler_name: handler.name().to_string(),
                        zone_id,
                    };
                }
                Ok(None) => {
                    debug!(zone = key, handler = handler.name(), "Handler not responsible");
                }
                Err(e) => {
                    warn!(
                        zone = key,
                        handler = handler.name(),
                        error = %e,
                        "Responsibility check failed, treating as not responsible"
                    );
                }
            }
        }

        info!(zone = key, "No handler responsible, zone will not be managed");
        ZoneBinding::Unmanaged
    }

    /// Snapshot of the zone table
    pub async fn bindings(&self) -> HashMap<String, ZoneBinding> {
        self.bindings.read().await.clone()
    }
}
