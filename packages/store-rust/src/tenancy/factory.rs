//! Factory for per-tenant persistence contexts under the database strategy.
//!
//! [`TenantContextFactory`] looks up the tenant's [`StoreConfig`], opens it
//! through the [`StoreConnector`], builds a fresh model for it with every
//! processor's schema hooks applied, and caches the resulting
//! [`StoreBinding`] per tenant. Different tenants never share a binding.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tenantry_core::{AmbientContext, DatabaseConfig, TenantId, TenantryError};

use crate::context::{PersistenceContext, StoreBinding};
use crate::processor::ProcessorPipeline;
use crate::registry::EntityRegistry;
use crate::store::StoreConnector;

/// Creates contexts bound to a tenant's dedicated store.
pub struct TenantContextFactory {
    config: DatabaseConfig,
    registry: Arc<EntityRegistry>,
    pipeline: Arc<ProcessorPipeline>,
    connector: Arc<dyn StoreConnector>,
    slots: DashMap<TenantId, Arc<StoreBinding>>,
}

impl TenantContextFactory {
    #[must_use]
    pub fn new(
        config: DatabaseConfig,
        registry: Arc<EntityRegistry>,
        pipeline: Arc<ProcessorPipeline>,
        connector: Arc<dyn StoreConnector>,
    ) -> Self {
        Self {
            config,
            registry,
            pipeline,
            connector,
            slots: DashMap::new(),
        }
    }

    /// Creates a context for `tenant`, pinned to that tenant.
    ///
    /// # Errors
    ///
    /// - [`TenantryError::TenantNotConfigured`] if the tenant has no store.
    /// - [`TenantryError::Store`] if the connector cannot open the store.
    /// - Any schema-build error from the processors.
    pub fn create(
        &self,
        tenant: &TenantId,
        ambient: Arc<AmbientContext>,
    ) -> Result<PersistenceContext, TenantryError> {
        let binding = self.binding(tenant)?;
        Ok(PersistenceContext::new(
            binding,
            Arc::clone(&self.pipeline),
            ambient,
            Some(tenant.clone()),
        ))
    }

    /// Number of tenants whose store has been opened.
    #[must_use]
    pub fn open_tenants(&self) -> usize {
        self.slots.len()
    }

    fn binding(&self, tenant: &TenantId) -> Result<Arc<StoreBinding>, TenantryError> {
        if let Some(slot) = self.slots.get(tenant) {
            return Ok(Arc::clone(slot.value()));
        }

        let store_config =
            self.config
                .store_for(tenant)
                .ok_or_else(|| TenantryError::TenantNotConfigured {
                    tenant_id: tenant.clone(),
                })?;
        let store = self
            .connector
            .connect(store_config)
            .map_err(TenantryError::Store)?;
        let model = self.pipeline.build_model(&self.registry)?;

        // Built outside the map lock; a concurrent first use of the same
        // tenant keeps whichever binding landed first.
        let binding = Arc::new(StoreBinding::new(store, model));
        match self.slots.entry(tenant.clone()) {
            Entry::Occupied(slot) => Ok(Arc::clone(slot.get())),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&binding));
                tracing::info!(tenant = %tenant, "tenant store opened");
                Ok(binding)
            }
        }
    }
}

impl std::fmt::Debug for TenantContextFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantContextFactory")
            .field("tenants", &self.config.tenants.len())
            .field("open", &self.slots.len())
            .finish_non_exhaustive()
    }
}
