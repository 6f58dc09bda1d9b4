// # domainmanager-core
//
// Core library for publishing cluster nodes under DNS names.
//
// ## Architecture Overview
//
// Nodes declare the domains they want to be reachable under through
// annotations. This library turns those declarations into DNS records:
// - **annotations**: Parses node annotations into a set of domain claims
// - **ProviderResolver**: Finds the DomainHandler responsible for a zone (cached)
// - **NodeStateCache**: Remembers nodes and computes claim deltas
// - **ReconciliationEngine**: Diffs desired against published records per handler shape
// - **DomainManager**: Drives the above from a stream of node events
// - **HandlerRegistry**: Plugin-based registry for DNS providers
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Core logic is separate from provider adapters
// 2. **Event-Driven**: Node changes arrive as a typed async stream
// 3. **Plugin-Based**: Providers are registered dynamically, no hard-coded if-else
// 4. **Library-First**: All core functionality can be used as a library
// 5. **Idempotency**: Unchanged nodes never reach a provider

pub mod annotations;
pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod node_cache;
pub mod registry;
pub mod resolver;
pub mod traits;

// Re-export core types for convenience
pub use annotations::{ClaimDelta, ClaimSet, DomainClaim, parse_claims};
pub use config::{DomainManagerConfig, EngineConfig, ProviderConfig};
pub use engine::{DomainManager, ManagerEvent, MutationKind, ReconcileOutcome, ReconciliationEngine};
pub use error::{Error, Result};
pub use handlers::MemoryDomainHandler;
pub use node_cache::{AddressSet, NodeRecord, NodeStateCache};
pub use registry::HandlerRegistry;
pub use resolver::{ProviderResolver, Resolution, ZoneBinding};
pub use traits::{
    DomainHandler, DomainTarget, HandlerApi, HandlerShape, HostResolver, NodeEvent,
    NodeEventSource, NodeSnapshot, ProviderRecord, RecordType,
};
