//! Plugin-based handler registry
//!
//! The registry allows domain handlers to be registered dynamically at
//! runtime, avoiding hardcoded if-else chains.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use domainmanager_core::registry::HandlerRegistry;
//!
//! let registry = HandlerRegistry::with_builtin();
//! domainmanager_provider_cloudflare::register(&registry);
//!
//! // Order of `config.providers` is the responsibility resolution order
//! let handlers = registry.create_handlers(&config.providers)?;
//! ```

use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use crate::handlers::MemoryHandlerFactory;
use crate::traits::{DomainHandler, DomainHandlerFactory};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

/// Handler registry for plugin-based handler creation
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct HandlerRegistry {
    /// Registered handler factories
    factories: RwLock<HashMap<String, Arc<dyn DomainHandlerFactory>>>,
}

impl HandlerRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in `memory` factory registered
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        registry.register_handler("memory", Box::new(MemoryHandlerFactory));
        registry
    }

    /// Register a handler factory
    ///
    /// # Parameters
    ///
    /// - `name`: Provider type name (e.g., "cloudflare", "memory")
    /// - `factory`: Factory object for creating handler instances
    pub fn register_handler(&self, name: impl Into<String>, factory: Box<dyn DomainHandlerFactory>) {
        let name = name.into();
        let mut factories = match self.factories.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        factories.insert(name, Arc::from(factory));
    }

    /// Create one handler from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Arc<dyn DomainHandler>)`: Created handler instance
    /// - `Err(Error)`: If the provider type is not registered or creation fails
    pub fn create_handler(&self, config: &ProviderConfig) -> Result<Arc<dyn DomainHandler>> {
        let provider_type = config.type_name();

        let factory = {
            let factories = match self.factories.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            factories
                .get(provider_type)
                .cloned()
                .ok_or_else(|| Error::config(format!("Unknown provider type: {}", provider_type)))?
        };

        config.validate()?;
        factory.create(config)
    }

    /// Create handlers for every configured provider, preserving order
    pub fn create_handlers(&self, configs: &[ProviderConfig]) -> Result<Vec<Arc<dyn DomainHandler>>> {
        configs
            .iter()
            .map(|config| {
                let handler = self.create_handler(config)?;
                info!(
                    handler = handler.name(),
                    shape = %handler.api().shape(),
                    "Registered domain handler"
                );
                Ok(handler)
            })
            .collect()
    }

    /// List all registered provider types
    pub fn list_handlers(&self) -> Vec<String> {
        match self.factories.read() {
            Ok(guard) => guard.keys().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().keys().cloned().collect(),
        }
    }

    /// Check if a provider type is registered
    pub fn has_handler(&self, name: &str) -> bool {
        match self.factories.read() {
            Ok(guard) => guard.contains_key(name),
            Err(poisoned) => poisoned.into_inner().contains_key(name),
        }
    }
}
