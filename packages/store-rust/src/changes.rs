//! Tracked entity changes awaiting commit.
//!
//! A [`ChangeSet`] is what pre-commit processors see: every pending entry with
//! its lifecycle state, the row as it was loaded (for modified and deleted
//! entries) and the row that will be written.

use std::sync::Arc;

use tenantry_core::{EntityDescriptor, EntityRecord, EntityState};

/// One tracked entity instance.
#[derive(Debug, Clone)]
pub struct EntityEntry {
    descriptor: Arc<EntityDescriptor>,
    state: EntityState,
    original: Option<EntityRecord>,
    current: EntityRecord,
}

impl EntityEntry {
    /// A new row that does not exist in the store yet.
    #[must_use]
    pub fn added(descriptor: Arc<EntityDescriptor>, record: EntityRecord) -> Self {
        Self {
            descriptor,
            state: EntityState::Added,
            original: None,
            current: record,
        }
    }

    /// An existing row with pending edits. `original` is the row as loaded.
    #[must_use]
    pub fn modified(
        descriptor: Arc<EntityDescriptor>,
        original: EntityRecord,
        current: EntityRecord,
    ) -> Self {
        Self {
            descriptor,
            state: EntityState::Modified,
            original: Some(original),
            current,
        }
    }

    /// An existing row scheduled for removal.
    #[must_use]
    pub fn deleted(descriptor: Arc<EntityDescriptor>, record: EntityRecord) -> Self {
        Self {
            descriptor,
            state: EntityState::Deleted,
            original: Some(record.clone()),
            current: record,
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.descriptor
    }

    #[must_use]
    pub fn entity_type(&self) -> &str {
        self.descriptor.name()
    }

    #[must_use]
    pub fn state(&self) -> EntityState {
        self.state
    }

    /// The row as loaded from the store; `None` for added entries.
    #[must_use]
    pub fn original(&self) -> Option<&EntityRecord> {
        self.original.as_ref()
    }

    #[must_use]
    pub fn current(&self) -> &EntityRecord {
        &self.current
    }

    pub fn current_mut(&mut self) -> &mut EntityRecord {
        &mut self.current
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.current.key
    }

    /// Whether this entry tracks the given row.
    #[must_use]
    pub fn is(&self, entity_type: &str, key: &str) -> bool {
        self.entity_type() == entity_type && self.current.key == key
    }
}

/// Pending entries in tracking order.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    entries: Vec<EntityEntry>,
}

impl ChangeSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: EntityEntry) {
        self.entries.push(entry);
    }

    /// Position of the entry tracking `entity_type/key`, if any.
    #[must_use]
    pub fn position(&self, entity_type: &str, key: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.is(entity_type, key))
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut EntityEntry> {
        self.entries.get_mut(idx)
    }

    pub fn remove(&mut self, idx: usize) -> EntityEntry {
        self.entries.remove(idx)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityEntry> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut EntityEntry> {
        self.entries.iter_mut()
    }
}

impl IntoIterator for ChangeSet {
    type Item = EntityEntry;
    type IntoIter = std::vec::IntoIter<EntityEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
