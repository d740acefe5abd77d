//! Schema model: per-entity fields, defaults, indexes and standing read
//! filters.
//!
//! [`ModelBuilder`] is what processors receive at schema-build time. Once every
//! processor has run, [`ModelBuilder::build`] freezes it into an immutable
//! [`Model`] that contexts share.
//!
//! Read filters are closures evaluated per query against the context's
//! [`FilterScope`], so a filter that depends on the current tenant is
//! re-evaluated for every operation rather than baked in at build time.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use tenantry_core::{EntityDescriptor, EntityRecord, TenantId, TenantryError, Value};

// ---------------------------------------------------------------------------
// Read filters
// ---------------------------------------------------------------------------

/// Per-query values a read filter may depend on.
#[derive(Debug, Clone, Copy)]
pub struct FilterScope<'a> {
    tenant: Option<&'a TenantId>,
}

impl<'a> FilterScope<'a> {
    #[must_use]
    pub fn new(tenant: Option<&'a TenantId>) -> Self {
        Self { tenant }
    }

    #[must_use]
    pub fn tenant(&self) -> Option<&'a TenantId> {
        self.tenant
    }

    /// # Errors
    ///
    /// Returns [`TenantryError::TenantNotSet`] if no tenant is in scope.
    pub fn require_tenant(&self) -> Result<&'a TenantId, TenantryError> {
        self.tenant.ok_or(TenantryError::TenantNotSet)
    }
}

type FilterFn =
    dyn Fn(&EntityRecord, &FilterScope<'_>) -> Result<bool, TenantryError> + Send + Sync;

/// Standing predicate applied to every read of an entity type.
///
/// Two filters compare equal when their name and expression match; the
/// predicate closure itself is not compared.
#[derive(Clone)]
pub struct ReadFilter {
    name: String,
    expression: String,
    requires_tenant: bool,
    predicate: Arc<FilterFn>,
}

impl ReadFilter {
    /// Creates a filter. `expression` is a human-readable rendering used for
    /// logging and schema comparison.
    pub fn new<F>(name: impl Into<String>, expression: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&EntityRecord, &FilterScope<'_>) -> Result<bool, TenantryError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            expression: expression.into(),
            requires_tenant: false,
            predicate: Arc::new(predicate),
        }
    }

    /// Marks the filter as tenant-dependent: reads fail with
    /// [`TenantryError::TenantNotSet`] before touching the store when no
    /// tenant is in scope, even if there are no rows to test.
    #[must_use]
    pub fn requiring_tenant(mut self) -> Self {
        self.requires_tenant = true;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    #[must_use]
    pub fn requires_tenant(&self) -> bool {
        self.requires_tenant
    }

    /// # Errors
    ///
    /// Propagates whatever the predicate returns.
    pub fn evaluate(
        &self,
        record: &EntityRecord,
        scope: &FilterScope<'_>,
    ) -> Result<bool, TenantryError> {
        (self.predicate)(record, scope)
    }
}

impl PartialEq for ReadFilter {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.expression == other.expression
            && self.requires_tenant == other.requires_tenant
    }
}

impl fmt::Debug for ReadFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadFilter")
            .field("name", &self.name)
            .field("expression", &self.expression)
            .field("requires_tenant", &self.requires_tenant)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Field and index definitions
// ---------------------------------------------------------------------------

/// Single field definition within an entity schema.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    /// Whether the field must hold a non-null value on every write.
    pub required: bool,
    /// Value filled in on add when the caller did not supply one.
    pub default: Option<Value>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            default: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub fields: Vec<String>,
    pub unique: bool,
}

// ---------------------------------------------------------------------------
// EntitySchema
// ---------------------------------------------------------------------------

/// Frozen schema of one entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySchema {
    descriptor: Arc<EntityDescriptor>,
    fields: Vec<FieldDef>,
    indexes: Vec<IndexDef>,
    filters: Vec<ReadFilter>,
}

impl EntitySchema {
    fn new(descriptor: Arc<EntityDescriptor>) -> Self {
        Self {
            descriptor,
            fields: Vec::new(),
            indexes: Vec::new(),
            filters: Vec::new(),
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.descriptor
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    #[must_use]
    pub fn indexes(&self) -> &[IndexDef] {
        &self.indexes
    }

    #[must_use]
    pub fn filters(&self) -> &[ReadFilter] {
        &self.filters
    }

    /// Fills in declared defaults for fields the record does not carry.
    pub fn apply_defaults(&self, record: &mut EntityRecord) {
        for field in &self.fields {
            if let Some(default) = &field.default {
                record
                    .fields
                    .entry(field.name.clone())
                    .or_insert_with(|| default.clone());
            }
        }
    }

    /// Checks that every required field holds a non-null value.
    ///
    /// # Errors
    ///
    /// Returns [`TenantryError::MissingField`] for the first missing field.
    pub fn validate(&self, record: &EntityRecord) -> Result<(), TenantryError> {
        for field in self.fields.iter().filter(|f| f.required) {
            if record.get(&field.name).map_or(true, Value::is_null) {
                return Err(TenantryError::MissingField {
                    entity_type: self.name().to_string(),
                    field: field.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Fails fast if any filter needs a tenant and none is in scope.
    ///
    /// # Errors
    ///
    /// Returns [`TenantryError::TenantNotSet`].
    pub fn check_scope(&self, scope: &FilterScope<'_>) -> Result<(), TenantryError> {
        if scope.tenant().is_none() && self.filters.iter().any(ReadFilter::requires_tenant) {
            return Err(TenantryError::TenantNotSet);
        }
        Ok(())
    }

    /// Whether `record` passes every read filter.
    ///
    /// # Errors
    ///
    /// Propagates filter failures.
    pub fn is_visible(
        &self,
        record: &EntityRecord,
        scope: &FilterScope<'_>,
    ) -> Result<bool, TenantryError> {
        for filter in &self.filters {
            if !filter.evaluate(record, scope)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Mutable schema of one entity type during schema build.
///
/// Every declaration is idempotent: declaring the same field, index or
/// named filter twice leaves a single definition.
#[derive(Debug)]
pub struct EntitySchemaBuilder {
    schema: EntitySchema,
}

impl EntitySchemaBuilder {
    fn new(descriptor: Arc<EntityDescriptor>) -> Self {
        Self {
            schema: EntitySchema::new(descriptor),
        }
    }

    /// Descriptor of the entity type being configured.
    #[must_use]
    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.schema.descriptor
    }

    /// Returns the named field, declaring it (optional, no default) if absent.
    pub fn property(&mut self, name: &str) -> &mut FieldDef {
        let idx = match self.schema.fields.iter().position(|f| f.name == name) {
            Some(idx) => idx,
            None => {
                self.schema.fields.push(FieldDef::new(name));
                self.schema.fields.len() - 1
            }
        };
        &mut self.schema.fields[idx]
    }

    /// Declares the field and marks it required.
    pub fn required(&mut self, name: &str) -> &mut Self {
        self.property(name).required = true;
        self
    }

    pub fn has_default(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        self.property(name).default = Some(value.into());
        self
    }

    pub fn has_index(&mut self, fields: &[&str], unique: bool) -> &mut Self {
        let index = IndexDef {
            fields: fields.iter().map(|f| (*f).to_string()).collect(),
            unique,
        };
        if !self.schema.indexes.contains(&index) {
            self.schema.indexes.push(index);
        }
        self
    }

    /// Installs a standing read filter, replacing any filter with the same name.
    pub fn has_query_filter(&mut self, filter: ReadFilter) -> &mut Self {
        if let Some(existing) = self
            .schema
            .filters
            .iter_mut()
            .find(|f| f.name == filter.name)
        {
            *existing = filter;
        } else {
            self.schema.filters.push(filter);
        }
        self
    }
}

/// Schema builder handed to processors; one per context type (or per tenant
/// under the database strategy).
#[derive(Debug, Default)]
pub struct ModelBuilder {
    entities: Vec<EntitySchemaBuilder>,
    by_name: HashMap<String, usize>,
}

impl ModelBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the schema builder for an entity type, adding it if absent.
    pub fn entity(&mut self, descriptor: Arc<EntityDescriptor>) -> &mut EntitySchemaBuilder {
        let existing = self.by_name.get(descriptor.name()).copied();
        let idx = match existing {
            Some(idx) => idx,
            None => {
                self.by_name
                    .insert(descriptor.name().to_string(), self.entities.len());
                self.entities.push(EntitySchemaBuilder::new(descriptor));
                self.entities.len() - 1
            }
        };
        &mut self.entities[idx]
    }

    #[must_use]
    pub fn entity_mut(&mut self, name: &str) -> Option<&mut EntitySchemaBuilder> {
        let idx = *self.by_name.get(name)?;
        self.entities.get_mut(idx)
    }

    /// Every declared entity type, in declaration order.
    pub fn entities_mut(&mut self) -> impl Iterator<Item = &mut EntitySchemaBuilder> {
        self.entities.iter_mut()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Freezes the builder.
    #[must_use]
    pub fn build(self) -> Model {
        let entities = self
            .entities
            .into_iter()
            .map(|b| (b.schema.name().to_string(), Arc::new(b.schema)))
            .collect();
        Model { entities }
    }
}

/// Immutable schema of every entity type a context knows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Model {
    entities: BTreeMap<String, Arc<EntitySchema>>,
}

impl Model {
    /// Looks up one entity type.
    ///
    /// # Errors
    ///
    /// Returns [`TenantryError::UnknownEntityType`] if it was never registered.
    pub fn entity(&self, name: &str) -> Result<&Arc<EntitySchema>, TenantryError> {
        self.entities
            .get(name)
            .ok_or_else(|| TenantryError::UnknownEntityType(name.to_string()))
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntitySchema>> {
        self.entities.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
