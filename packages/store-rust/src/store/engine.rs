//! Store engine and connector traits.
//!
//! The storage engine is an external collaborator: this crate only needs a
//! keyed row store per entity type and a way to obtain one from a
//! [`StoreConfig`]. [`MemoryStore`](super::MemoryStore) and
//! [`MemoryConnector`](super::MemoryConnector) are the bundled
//! implementations.

use std::sync::Arc;

use tenantry_core::{EntityRecord, StoreConfig};

/// Keyed row storage, namespaced by entity type.
///
/// All operations are synchronous. Wrapped in `Arc<dyn StoreEngine>` for
/// sharing between the contexts that point at the same store.
pub trait StoreEngine: Send + Sync + 'static {
    /// Insert or replace a row. Returns the previous row if any.
    fn put(&self, entity_type: &str, record: EntityRecord) -> Option<EntityRecord>;

    /// Insert a row only if its key is free. Hands the row back when the key
    /// is already taken.
    ///
    /// # Errors
    ///
    /// Returns the rejected row if a row with the same key exists.
    fn insert(&self, entity_type: &str, record: EntityRecord) -> Result<(), EntityRecord>;

    /// Retrieve a row by key, or `None` if not present.
    fn get(&self, entity_type: &str, key: &str) -> Option<EntityRecord>;

    /// Remove a row by key, returning the removed row.
    fn remove(&self, entity_type: &str, key: &str) -> Option<EntityRecord>;

    /// Point-in-time snapshot of every row of one entity type, ordered by key.
    fn scan(&self, entity_type: &str) -> Vec<EntityRecord>;

    /// Number of rows of one entity type.
    fn len(&self, entity_type: &str) -> usize;

    /// Whether the store holds no rows at all.
    fn is_empty(&self) -> bool;
}

/// Opens the store a [`StoreConfig`] points at.
pub trait StoreConnector: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the configuration is unsupported or the store
    /// cannot be reached.
    fn connect(&self, config: &StoreConfig) -> anyhow::Result<Arc<dyn StoreEngine>>;
}
