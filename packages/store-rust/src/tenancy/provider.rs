//! Uniform entry point for obtaining a persistence context, whatever the
//! tenancy strategy.
//!
//! Without multi-tenancy, and under the discriminator strategy, every
//! context shares one store binding built once at [`ContextProviderBuilder::build`].
//! Under the database strategy each request is routed to the tenant's own
//! store through [`TenantContextFactory`].

use std::sync::Arc;

use tenantry_core::{
    AmbientContext, ClockSource, FeatureSet, StoreConfig, SystemClock, TenantId, TenantStrategy,
    TenantryError,
};

use super::factory::TenantContextFactory;
use crate::context::{PersistenceContext, StoreBinding};
use crate::processor::{FeatureProcessor, ProcessorPipeline};
use crate::registry::EntityRegistry;
use crate::store::{MemoryConnector, StoreConnector};

enum Routing {
    Shared(Arc<StoreBinding>),
    PerTenant(TenantContextFactory),
}

/// Hands out persistence contexts bound to an operation's ambient context.
pub struct ContextProvider {
    features: Arc<FeatureSet>,
    pipeline: Arc<ProcessorPipeline>,
    routing: Routing,
}

impl ContextProvider {
    #[must_use]
    pub fn builder(
        features: Arc<FeatureSet>,
        registry: Arc<EntityRegistry>,
    ) -> ContextProviderBuilder {
        ContextProviderBuilder {
            features,
            registry,
            connector: None,
            clock: None,
            extra: Vec::new(),
        }
    }

    #[must_use]
    pub fn features(&self) -> &Arc<FeatureSet> {
        &self.features
    }

    #[must_use]
    pub fn pipeline(&self) -> &Arc<ProcessorPipeline> {
        &self.pipeline
    }

    /// Returns a context for the operation owning `ambient`.
    ///
    /// An explicit `tenant` pins the context to that tenant. Otherwise the
    /// context follows the ambient tenant.
    ///
    /// # Errors
    ///
    /// Under the database strategy:
    /// - [`TenantryError::TenantNotSet`] if no tenant is given and the ambient
    ///   tenant is unset.
    /// - [`TenantryError::TenantNotConfigured`] for an unknown tenant.
    pub fn context(
        &self,
        ambient: &Arc<AmbientContext>,
        tenant: Option<&TenantId>,
    ) -> Result<PersistenceContext, TenantryError> {
        match &self.routing {
            Routing::Shared(binding) => Ok(PersistenceContext::new(
                Arc::clone(binding),
                Arc::clone(&self.pipeline),
                Arc::clone(ambient),
                tenant.cloned(),
            )),
            Routing::PerTenant(factory) => {
                let tenant = match tenant {
                    Some(tenant) => tenant.clone(),
                    None => ambient.tenant().ok_or(TenantryError::TenantNotSet)?,
                };
                factory.create(&tenant, Arc::clone(ambient))
            }
        }
    }
}

impl std::fmt::Debug for ContextProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let routing = match &self.routing {
            Routing::Shared(_) => "shared",
            Routing::PerTenant(_) => "per_tenant",
        };
        f.debug_struct("ContextProvider")
            .field("routing", &routing)
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ContextProvider`].
pub struct ContextProviderBuilder {
    features: Arc<FeatureSet>,
    registry: Arc<EntityRegistry>,
    connector: Option<Arc<dyn StoreConnector>>,
    clock: Option<Arc<dyn ClockSource>>,
    extra: Vec<Arc<dyn FeatureProcessor>>,
}

impl ContextProviderBuilder {
    /// Connector used to open stores. Defaults to a fresh [`MemoryConnector`].
    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn StoreConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Clock used for audit stamps. Defaults to [`SystemClock`].
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn ClockSource>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Appends a host processor after the built-in ones.
    #[must_use]
    pub fn processor(mut self, processor: Arc<dyn FeatureProcessor>) -> Self {
        self.extra.push(processor);
        self
    }

    /// Wires the pipeline and, for shared routing, opens the store and builds
    /// the model.
    ///
    /// # Errors
    ///
    /// - [`TenantryError::Configuration`] if no store is reachable.
    /// - [`TenantryError::Store`] if the shared store cannot be opened.
    /// - Any schema-build error from the processors.
    pub fn build(self) -> Result<ContextProvider, TenantryError> {
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(MemoryConnector::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let mut pipeline = ProcessorPipeline::for_features(&self.features, clock);
        for processor in self.extra {
            pipeline.add(processor);
        }
        let pipeline = Arc::new(pipeline);

        let routing = match self.features.multi_tenant() {
            Some(TenantStrategy::Database(config)) => Routing::PerTenant(TenantContextFactory::new(
                config.clone(),
                self.registry,
                Arc::clone(&pipeline),
                connector,
            )),
            Some(TenantStrategy::Discriminator(config)) => Routing::Shared(shared_binding(
                &config.store,
                connector.as_ref(),
                &pipeline,
                &self.registry,
            )?),
            None => {
                let store = self.features.store().ok_or_else(|| {
                    TenantryError::Configuration("no store configured".to_string())
                })?;
                Routing::Shared(shared_binding(
                    store,
                    connector.as_ref(),
                    &pipeline,
                    &self.registry,
                )?)
            }
        };

        tracing::debug!(
            strategy = self.features.multi_tenant().map_or("none", TenantStrategy::kind),
            processors = ?pipeline.names(),
            "context provider ready"
        );

        Ok(ContextProvider {
            features: self.features,
            pipeline,
            routing,
        })
    }
}

fn shared_binding(
    store: &StoreConfig,
    connector: &dyn StoreConnector,
    pipeline: &ProcessorPipeline,
    registry: &EntityRegistry,
) -> Result<Arc<StoreBinding>, TenantryError> {
    let store = connector.connect(store).map_err(TenantryError::Store)?;
    let model = pipeline.build_model(registry)?;
    Ok(Arc::new(StoreBinding::new(store, model)))
}
