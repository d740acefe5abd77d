//! In-memory [`StoreEngine`] backed by [`DashMap`], and the matching
//! [`StoreConnector`].

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tenantry_core::{EntityRecord, StoreConfig};

use super::engine::{StoreConnector, StoreEngine};

/// In-memory row store with fine-grained sharded locking.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<(String, String), EntityRecord>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StoreEngine for MemoryStore {
    fn put(&self, entity_type: &str, record: EntityRecord) -> Option<EntityRecord> {
        self.entries
            .insert((entity_type.to_string(), record.key.clone()), record)
    }

    fn insert(&self, entity_type: &str, record: EntityRecord) -> Result<(), EntityRecord> {
        match self
            .entries
            .entry((entity_type.to_string(), record.key.clone()))
        {
            Entry::Occupied(_) => Err(record),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    fn get(&self, entity_type: &str, key: &str) -> Option<EntityRecord> {
        self.entries
            .get(&(entity_type.to_string(), key.to_string()))
            .map(|r| r.clone())
    }

    fn remove(&self, entity_type: &str, key: &str) -> Option<EntityRecord> {
        self.entries
            .remove(&(entity_type.to_string(), key.to_string()))
            .map(|(_, r)| r)
    }

    fn scan(&self, entity_type: &str) -> Vec<EntityRecord> {
        let mut rows: Vec<EntityRecord> = self
            .entries
            .iter()
            .filter(|entry| entry.key().0 == entity_type)
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        rows
    }

    fn len(&self, entity_type: &str) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.key().0 == entity_type)
            .count()
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Connector for [`StoreConfig::InMemory`] databases.
///
/// Each database name maps to one shared [`MemoryStore`], so every context
/// configured with the same name sees the same rows.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    databases: DashMap<String, Arc<MemoryStore>>,
}

impl MemoryConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the named database if it has been opened.
    #[must_use]
    pub fn database(&self, name: &str) -> Option<Arc<MemoryStore>> {
        self.databases.get(name).map(|db| Arc::clone(db.value()))
    }

    /// Number of databases opened so far.
    #[must_use]
    pub fn database_count(&self) -> usize {
        self.databases.len()
    }
}

impl StoreConnector for MemoryConnector {
    fn connect(&self, config: &StoreConfig) -> anyhow::Result<Arc<dyn StoreEngine>> {
        match config {
            StoreConfig::InMemory { database } => {
                let store = self
                    .databases
                    .entry(database.clone())
                    .or_insert_with(|| Arc::new(MemoryStore::new()))
                    .clone();
                Ok(store)
            }
            StoreConfig::Connection { .. } => {
                anyhow::bail!("the in-memory connector cannot open connection-string stores")
            }
        }
    }
}
