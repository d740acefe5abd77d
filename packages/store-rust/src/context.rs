//! Persistence context: the unit-of-work a single operation uses to read and
//! write entities.
//!
//! A [`PersistenceContext`] pairs a store with the [`Model`] built for it,
//! tracks pending changes, and on [`save_changes`](PersistenceContext::save_changes)
//! runs the processor pipeline before writing. Reads apply every standing read
//! filter of the model against the context's current tenant.
//!
//! Reads always go to the store; pending changes become visible after a
//! successful save.

use std::collections::HashSet;
use std::sync::Arc;

use tenantry_core::{
    AmbientContext, EntityRecord, EntityState, TenantId, TenantryError, UserId,
};
use uuid::Uuid;

use crate::changes::{ChangeSet, EntityEntry};
use crate::processor::{CommitScope, ProcessorPipeline};
use crate::schema::{EntitySchema, FilterScope, Model};
use crate::store::StoreEngine;

/// A store together with the model built for it. Shared by every context
/// that points at the same store.
pub struct StoreBinding {
    store: Arc<dyn StoreEngine>,
    model: Arc<Model>,
}

impl StoreBinding {
    #[must_use]
    pub fn new(store: Arc<dyn StoreEngine>, model: Model) -> Self {
        Self {
            store,
            model: Arc::new(model),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn StoreEngine> {
        &self.store
    }

    #[must_use]
    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }
}

impl std::fmt::Debug for StoreBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreBinding")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// Unit of work bound to one operation's ambient context.
pub struct PersistenceContext {
    binding: Arc<StoreBinding>,
    pipeline: Arc<ProcessorPipeline>,
    ambient: Arc<AmbientContext>,
    pinned_tenant: Option<TenantId>,
    changes: ChangeSet,
}

impl PersistenceContext {
    /// Creates a context. A pinned tenant takes precedence over the ambient
    /// tenant for both filtering and stamping.
    #[must_use]
    pub fn new(
        binding: Arc<StoreBinding>,
        pipeline: Arc<ProcessorPipeline>,
        ambient: Arc<AmbientContext>,
        pinned_tenant: Option<TenantId>,
    ) -> Self {
        Self {
            binding,
            pipeline,
            ambient,
            pinned_tenant,
            changes: ChangeSet::new(),
        }
    }

    /// The tenant this context reads and writes as, if any.
    #[must_use]
    pub fn current_tenant(&self) -> Option<TenantId> {
        self.pinned_tenant
            .clone()
            .or_else(|| self.ambient.tenant())
    }

    #[must_use]
    pub fn current_user(&self) -> Option<UserId> {
        self.ambient.user()
    }

    #[must_use]
    pub fn model(&self) -> &Model {
        &self.binding.model
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn StoreEngine> {
        &self.binding.store
    }

    /// Pending changes in tracking order.
    #[must_use]
    pub fn pending(&self) -> &ChangeSet {
        &self.changes
    }

    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    fn schema(&self, entity_type: &str) -> Result<Arc<EntitySchema>, TenantryError> {
        self.binding.model.entity(entity_type).map(Arc::clone)
    }

    /// Tracks a new row. Schema defaults fill missing fields and an empty key
    /// is replaced with a generated one. Returns the row's key.
    ///
    /// # Errors
    ///
    /// Returns [`TenantryError::UnknownEntityType`] for unregistered types.
    pub fn add(
        &mut self,
        entity_type: &str,
        mut record: EntityRecord,
    ) -> Result<String, TenantryError> {
        let schema = self.schema(entity_type)?;
        schema.apply_defaults(&mut record);
        if record.key.is_empty() {
            record.key = Uuid::new_v4().to_string();
        }
        let key = record.key.clone();
        self.changes
            .push(EntityEntry::added(Arc::clone(schema.descriptor()), record));
        Ok(key)
    }

    /// Looks up one row through the read filters.
    ///
    /// # Errors
    ///
    /// Returns [`TenantryError::UnknownEntityType`] for unregistered types and
    /// [`TenantryError::TenantNotSet`] when a tenant filter applies and no
    /// tenant is in scope.
    pub fn find(
        &self,
        entity_type: &str,
        key: &str,
    ) -> Result<Option<EntityRecord>, TenantryError> {
        let schema = self.schema(entity_type)?;
        let tenant = self.current_tenant();
        let scope = FilterScope::new(tenant.as_ref());
        schema.check_scope(&scope)?;
        match self.binding.store.get(entity_type, key) {
            Some(row) if schema.is_visible(&row, &scope)? => Ok(Some(row)),
            _ => Ok(None),
        }
    }

    /// Every visible row of one entity type, ordered by key.
    ///
    /// # Errors
    ///
    /// Same as [`find`](Self::find).
    pub fn query(&self, entity_type: &str) -> Result<Vec<EntityRecord>, TenantryError> {
        let schema = self.schema(entity_type)?;
        let tenant = self.current_tenant();
        let scope = FilterScope::new(tenant.as_ref());
        schema.check_scope(&scope)?;
        let mut visible = Vec::new();
        for row in self.binding.store.scan(entity_type) {
            if schema.is_visible(&row, &scope)? {
                visible.push(row);
            }
        }
        Ok(visible)
    }

    /// Edits a row in place. A row already tracked as added or modified is
    /// edited directly; otherwise the visible row is loaded and tracked as
    /// modified. The key cannot be changed.
    ///
    /// # Errors
    ///
    /// Returns [`TenantryError::EntityNotFound`] if the row is missing,
    /// invisible to the current tenant, or pending deletion.
    pub fn update<F>(
        &mut self,
        entity_type: &str,
        key: &str,
        edit: F,
    ) -> Result<(), TenantryError>
    where
        F: FnOnce(&mut EntityRecord),
    {
        if let Some(idx) = self.changes.position(entity_type, key) {
            return match self.changes.get_mut(idx) {
                Some(entry) if entry.state() != EntityState::Deleted => {
                    edit(entry.current_mut());
                    entry.current_mut().key = key.to_string();
                    Ok(())
                }
                _ => Err(not_found(entity_type, key)),
            };
        }

        let schema = self.schema(entity_type)?;
        let original = self
            .find(entity_type, key)?
            .ok_or_else(|| not_found(entity_type, key))?;
        let mut current = original.clone();
        edit(&mut current);
        current.key = key.to_string();
        self.changes.push(EntityEntry::modified(
            Arc::clone(schema.descriptor()),
            original,
            current,
        ));
        Ok(())
    }

    /// Schedules a row for deletion. Removing a row that was only added in
    /// this context simply forgets it.
    ///
    /// # Errors
    ///
    /// Returns [`TenantryError::EntityNotFound`] if the row is missing or
    /// invisible to the current tenant.
    pub fn remove(&mut self, entity_type: &str, key: &str) -> Result<(), TenantryError> {
        if let Some(idx) = self.changes.position(entity_type, key) {
            let entry = self.changes.remove(idx);
            match entry.state() {
                EntityState::Added => {}
                EntityState::Deleted => self.changes.push(entry),
                EntityState::Modified | EntityState::Unchanged => {
                    let original = entry
                        .original()
                        .cloned()
                        .unwrap_or_else(|| entry.current().clone());
                    self.changes
                        .push(EntityEntry::deleted(Arc::clone(entry.descriptor()), original));
                }
            }
            return Ok(());
        }

        let schema = self.schema(entity_type)?;
        let row = self
            .find(entity_type, key)?
            .ok_or_else(|| not_found(entity_type, key))?;
        self.changes
            .push(EntityEntry::deleted(Arc::clone(schema.descriptor()), row));
        Ok(())
    }

    /// Runs the pre-commit pipeline, validates and writes every pending
    /// change. Returns the number of rows written.
    ///
    /// Added rows never overwrite: a key already present in the store fails
    /// the whole commit. On error nothing is written and the pending changes
    /// are kept, including any stamps processors applied before the failure.
    ///
    /// # Errors
    ///
    /// Returns the first processor or validation error, or
    /// [`TenantryError::DuplicateKey`] for an added row whose key is taken.
    pub fn save_changes(&mut self) -> Result<usize, TenantryError> {
        if self.changes.is_empty() {
            return Ok(0);
        }
        let scope = CommitScope::new(self.current_tenant(), self.current_user());
        let span = tracing::debug_span!(
            "save_changes",
            tenant = ?scope.tenant(),
            pending = self.changes.len(),
        );
        let _enter = span.enter();

        let mut changes = std::mem::take(&mut self.changes);
        match self.commit(&mut changes, &scope) {
            Ok(written) => {
                tracing::info!(tenant = ?scope.tenant(), written, "changes saved");
                Ok(written)
            }
            Err(err) => {
                tracing::debug!(error = %err, "save rejected");
                self.changes = changes;
                Err(err)
            }
        }
    }

    fn commit(
        &self,
        changes: &mut ChangeSet,
        scope: &CommitScope,
    ) -> Result<usize, TenantryError> {
        self.pipeline.pre_commit(changes, scope)?;

        let store = &self.binding.store;
        let mut added = HashSet::new();
        for entry in changes.iter() {
            match entry.state() {
                EntityState::Deleted | EntityState::Unchanged => continue,
                EntityState::Added => {
                    let fresh = added.insert((entry.entity_type(), entry.key()));
                    if !fresh || store.get(entry.entity_type(), entry.key()).is_some() {
                        return Err(duplicate(entry.entity_type(), entry.key()));
                    }
                }
                EntityState::Modified => {}
            }
            self.schema(entry.entity_type())?.validate(entry.current())?;
        }

        let mut written = 0;
        for entry in changes.iter() {
            match entry.state() {
                EntityState::Added => {
                    // A concurrent commit may have claimed the key since the check.
                    store
                        .insert(entry.entity_type(), entry.current().clone())
                        .map_err(|_| duplicate(entry.entity_type(), entry.key()))?;
                }
                EntityState::Modified => {
                    store.put(entry.entity_type(), entry.current().clone());
                }
                EntityState::Deleted => {
                    store.remove(entry.entity_type(), entry.key());
                }
                EntityState::Unchanged => continue,
            }
            written += 1;
        }
        Ok(written)
    }
}

fn duplicate(entity_type: &str, key: &str) -> TenantryError {
    TenantryError::DuplicateKey {
        entity_type: entity_type.to_string(),
        key: key.to_string(),
    }
}

fn not_found(entity_type: &str, key: &str) -> TenantryError {
    TenantryError::EntityNotFound {
        entity_type: entity_type.to_string(),
        key: key.to_string(),
    }
}

impl std::fmt::Debug for PersistenceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceContext")
            .field("tenant", &self.current_tenant())
            .field("pending", &self.changes.len())
            .finish_non_exhaustive()
    }
}
