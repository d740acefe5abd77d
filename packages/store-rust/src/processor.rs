//! Feature processor trait and the ordered pipeline that fans hooks out to
//! every registered processor.
//!
//! Processors plug cross-cutting behavior into two points of a context's
//! life: schema build (once per context type, or once per tenant under the
//! database strategy) and pre-commit (every `save_changes`).

use std::sync::Arc;

use tenantry_core::{ClockSource, FeatureSet, TenantId, TenantStrategy, TenantryError, UserId};

use crate::audit::AuditingProcessor;
use crate::changes::ChangeSet;
use crate::registry::EntityRegistry;
use crate::schema::{EntitySchemaBuilder, Model, ModelBuilder};
use crate::tenancy::DiscriminatorProcessor;

/// Ambient values visible to pre-commit hooks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitScope {
    tenant: Option<TenantId>,
    user: Option<UserId>,
}

impl CommitScope {
    #[must_use]
    pub fn new(tenant: Option<TenantId>, user: Option<UserId>) -> Self {
        Self { tenant, user }
    }

    #[must_use]
    pub fn tenant(&self) -> Option<&TenantId> {
        self.tenant.as_ref()
    }

    /// # Errors
    ///
    /// Returns [`TenantryError::TenantNotSet`] if no tenant is in scope.
    pub fn require_tenant(&self) -> Result<&TenantId, TenantryError> {
        self.tenant.as_ref().ok_or(TenantryError::TenantNotSet)
    }

    #[must_use]
    pub fn user(&self) -> Option<&UserId> {
        self.user.as_ref()
    }
}

/// Pluggable behavior attached to a feature.
///
/// Every hook defaults to a no-op, so processors implement only what they
/// need. Used as `Arc<dyn FeatureProcessor>`.
pub trait FeatureProcessor: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Called once per schema build with the whole model.
    ///
    /// # Errors
    ///
    /// An error aborts the schema build.
    fn on_schema_build(&self, _model: &mut ModelBuilder) -> Result<(), TenantryError> {
        Ok(())
    }

    /// Called once per registered entity type, after [`on_schema_build`](Self::on_schema_build).
    ///
    /// # Errors
    ///
    /// An error aborts the schema build.
    fn on_schema_build_entity(
        &self,
        _entity: &mut EntitySchemaBuilder,
    ) -> Result<(), TenantryError> {
        Ok(())
    }

    /// Called before tracked changes are written.
    ///
    /// # Errors
    ///
    /// An error aborts the commit; nothing is written.
    fn on_pre_commit(
        &self,
        _changes: &mut ChangeSet,
        _scope: &CommitScope,
    ) -> Result<(), TenantryError> {
        Ok(())
    }
}

/// Processors in registration order.
#[derive(Clone, Default)]
pub struct ProcessorPipeline {
    processors: Vec<Arc<dyn FeatureProcessor>>,
}

impl ProcessorPipeline {
    #[must_use]
    pub fn new(processors: Vec<Arc<dyn FeatureProcessor>>) -> Self {
        Self { processors }
    }

    /// The built-in processors the feature set enables: the discriminator
    /// processor first, then auditing.
    #[must_use]
    pub fn for_features(features: &FeatureSet, clock: Arc<dyn ClockSource>) -> Self {
        let mut pipeline = Self::default();
        if let Some(TenantStrategy::Discriminator(config)) = features.multi_tenant() {
            pipeline.add(Arc::new(DiscriminatorProcessor::new(
                config.tenant_field.clone(),
            )));
        }
        if let Some(options) = features.auditing() {
            pipeline.add(Arc::new(AuditingProcessor::new(options.clone(), clock)));
        }
        pipeline
    }

    /// Appends a processor after those already registered.
    pub fn add(&mut self, processor: Arc<dyn FeatureProcessor>) {
        self.processors.push(processor);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.processors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.processors.iter().map(|p| p.name()).collect()
    }

    /// Runs each processor's global hook followed by its per-entity hook for
    /// every entity type, processor by processor.
    ///
    /// # Errors
    ///
    /// Returns the first processor error.
    pub fn build_schema(&self, model: &mut ModelBuilder) -> Result<(), TenantryError> {
        for processor in &self.processors {
            processor.on_schema_build(model)?;
            for entity in model.entities_mut() {
                processor.on_schema_build_entity(entity)?;
            }
        }
        Ok(())
    }

    /// Builds a fresh model from the registry and runs the schema hooks on it.
    ///
    /// # Errors
    ///
    /// Returns the first processor error.
    pub fn build_model(&self, registry: &EntityRegistry) -> Result<Model, TenantryError> {
        let mut builder = registry.model_builder();
        self.build_schema(&mut builder)?;
        let model = builder.build();
        tracing::debug!(
            entities = model.len(),
            processors = ?self.names(),
            "schema built"
        );
        Ok(model)
    }

    /// Runs every pre-commit hook in order, stopping at the first error.
    ///
    /// # Errors
    ///
    /// Returns the first processor error.
    pub fn pre_commit(
        &self,
        changes: &mut ChangeSet,
        scope: &CommitScope,
    ) -> Result<(), TenantryError> {
        for processor in &self.processors {
            processor.on_pre_commit(changes, scope)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ProcessorPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorPipeline")
            .field("processors", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use tenantry_core::{
        EntityCapabilities, EntityRecord, MissingUserPolicy, StoreConfig, SystemClock,
    };

    use super::*;
    use crate::changes::EntityEntry;

    /// Records every hook call into a shared log.
    struct Recording {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_commit: bool,
    }

    impl FeatureProcessor for Recording {
        fn name(&self) -> &str {
            self.name
        }

        fn on_schema_build(&self, _model: &mut ModelBuilder) -> Result<(), TenantryError> {
            self.log.lock().push(format!("{}:model", self.name));
            Ok(())
        }

        fn on_schema_build_entity(
            &self,
            entity: &mut EntitySchemaBuilder,
        ) -> Result<(), TenantryError> {
            self.log
                .lock()
                .push(format!("{}:{}", self.name, entity.descriptor().name()));
            Ok(())
        }

        fn on_pre_commit(
            &self,
            _changes: &mut ChangeSet,
            _scope: &CommitScope,
        ) -> Result<(), TenantryError> {
            self.log.lock().push(format!("{}:commit", self.name));
            if self.fail_commit {
                return Err(TenantryError::TenantNotSet);
            }
            Ok(())
        }
    }

    fn recording(
        name: &'static str,
        log: &Arc<Mutex<Vec<String>>>,
        fail_commit: bool,
    ) -> Arc<dyn FeatureProcessor> {
        Arc::new(Recording {
            name,
            log: Arc::clone(log),
            fail_commit,
        })
    }

    #[test]
    fn schema_hooks_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = ProcessorPipeline::new(vec![
            recording("a", &log, false),
            recording("b", &log, false),
        ]);
        let registry = EntityRegistry::new()
            .register("Product", EntityCapabilities::NONE)
            .register("Order", EntityCapabilities::NONE);

        pipeline.build_model(&registry).unwrap();

        assert_eq!(
            *log.lock(),
            vec!["a:model", "a:Product", "a:Order", "b:model", "b:Product", "b:Order"]
        );
    }

    #[test]
    fn pre_commit_stops_at_first_error() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = ProcessorPipeline::new(vec![
            recording("a", &log, true),
            recording("b", &log, false),
        ]);
        let mut changes = ChangeSet::new();
        let descriptor = Arc::new(tenantry_core::EntityDescriptor::new(
            "Product",
            EntityCapabilities::NONE,
        ));
        changes.push(EntityEntry::added(descriptor, EntityRecord::new("p1")));

        let result = pipeline.pre_commit(&mut changes, &CommitScope::default());
        assert!(matches!(result, Err(TenantryError::TenantNotSet)));
        assert_eq!(*log.lock(), vec!["a:commit"]);
    }

    #[test]
    fn for_features_orders_discriminator_before_auditing() {
        let features = FeatureSet::builder()
            .multi_tenant_by_discriminator(StoreConfig::in_memory("shared"))
            .auditing(MissingUserPolicy::SaveAsNull)
            .build()
            .unwrap();
        let pipeline = ProcessorPipeline::for_features(&features, Arc::new(SystemClock));
        assert_eq!(pipeline.names(), vec!["multi_tenant", "auditing"]);
    }

    #[test]
    fn plain_features_register_no_processors() {
        let features = FeatureSet::builder()
            .use_store(StoreConfig::in_memory("plain"))
            .build()
            .unwrap();
        assert!(ProcessorPipeline::for_features(&features, Arc::new(SystemClock)).is_empty());
    }

    #[test]
    fn commit_scope_requires_tenant() {
        assert!(matches!(
            CommitScope::default().require_tenant(),
            Err(TenantryError::TenantNotSet)
        ));
        let scope = CommitScope::new(Some(TenantId::new("a")), None);
        assert_eq!(scope.require_tenant().unwrap().as_str(), "a");
    }
}
