//! Core traits for the domain manager
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`DomainHandler`]: Read and mutate records at a DNS provider
//! - [`HostResolver`]: Resolve node hostnames to addresses
//! - [`NodeEventSource`]: Deliver node lifecycle events

pub mod domain_handler;
pub mod event_source;
pub mod host_resolver;

pub use domain_handler::{
    DomainHandler, DomainHandlerFactory, DomainTarget, GroupedRecordApi, HandlerApi, HandlerShape,
    ProviderRecord, RecordType, SingleRecordApi,
};
pub use event_source::{NodeEvent, NodeEventSource, NodeSnapshot};
pub use host_resolver::{HostResolver, SystemHostResolver};
