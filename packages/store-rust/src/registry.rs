//! Registry of persisted entity types.
//!
//! Each registration memoizes the type's [`EntityDescriptor`] and optionally
//! carries a closure that configures the type's schema (fields, defaults,
//! indexes). The registry is assembled once at startup and then shared
//! read-only; [`EntityRegistry::model_builder`] turns it into a fresh
//! [`ModelBuilder`] for every schema build.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tenantry_core::{EntityCapabilities, EntityDescriptor};

use crate::schema::{EntitySchemaBuilder, ModelBuilder};

type ConfigureFn = dyn Fn(&mut EntitySchemaBuilder) + Send + Sync;

/// One registered entity type.
#[derive(Clone)]
pub struct EntityRegistration {
    descriptor: Arc<EntityDescriptor>,
    configure: Option<Arc<ConfigureFn>>,
}

impl EntityRegistration {
    #[must_use]
    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.descriptor
    }
}

impl fmt::Debug for EntityRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRegistration")
            .field("descriptor", &self.descriptor)
            .field("configure", &self.configure.is_some())
            .finish()
    }
}

/// Entity types known to a context, in registration order.
#[derive(Debug, Default, Clone)]
pub struct EntityRegistry {
    entries: Vec<EntityRegistration>,
    by_name: HashMap<String, usize>,
}

impl EntityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entity type with no schema configuration of its own.
    #[must_use]
    pub fn register(self, name: &str, capabilities: EntityCapabilities) -> Self {
        self.insert(name, capabilities, None)
    }

    /// Registers an entity type together with its schema configuration.
    ///
    /// The closure runs before any feature processor sees the type.
    #[must_use]
    pub fn register_with<F>(
        self,
        name: &str,
        capabilities: EntityCapabilities,
        configure: F,
    ) -> Self
    where
        F: Fn(&mut EntitySchemaBuilder) + Send + Sync + 'static,
    {
        self.insert(name, capabilities, Some(Arc::new(configure)))
    }

    /// Re-registering a name replaces the earlier registration in place.
    fn insert(
        mut self,
        name: &str,
        capabilities: EntityCapabilities,
        configure: Option<Arc<ConfigureFn>>,
    ) -> Self {
        let registration = EntityRegistration {
            descriptor: Arc::new(EntityDescriptor::new(name, capabilities)),
            configure,
        };
        if let Some(&idx) = self.by_name.get(name) {
            self.entries[idx] = registration;
        } else {
            self.by_name.insert(name.to_string(), self.entries.len());
            self.entries.push(registration);
        }
        self
    }

    #[must_use]
    pub fn descriptor(&self, name: &str) -> Option<&Arc<EntityDescriptor>> {
        self.by_name
            .get(name)
            .map(|&idx| &self.entries[idx].descriptor)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityRegistration> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A fresh builder with every registered type declared and its own
    /// configuration applied. No state is shared between builders.
    #[must_use]
    pub fn model_builder(&self) -> ModelBuilder {
        let mut builder = ModelBuilder::new();
        for registration in &self.entries {
            let entity = builder.entity(Arc::clone(&registration.descriptor));
            if let Some(configure) = &registration.configure {
                configure(entity);
            }
        }
        builder
    }
}
