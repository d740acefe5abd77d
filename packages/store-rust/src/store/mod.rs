//! Row storage used by persistence contexts.
//!
//! - [`StoreEngine`]: keyed rows per entity type
//! - [`StoreConnector`]: turns a `StoreConfig` into a `StoreEngine`
//! - [`MemoryStore`] / [`MemoryConnector`]: bundled in-memory implementations

pub mod engine;
pub mod memory;

pub use engine::{StoreConnector, StoreEngine};
pub use memory::{MemoryConnector, MemoryStore};
