// # Built-in Domain Handlers
//
// Provider adapters that ship with the core library. Network-backed
// adapters live in their own crates.

pub mod memory;

pub use memory::{MemoryDomainHandler, MemoryHandlerFactory};
