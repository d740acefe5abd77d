//! Row-discrimination tenancy: one shared store, a tenant field on every
//! tenant-aware row and a standing read filter on it.

use tenantry_core::{EntityRecord, EntityState, TenantryError, Value};

use crate::changes::ChangeSet;
use crate::processor::{CommitScope, FeatureProcessor};
use crate::schema::{EntitySchemaBuilder, FilterScope, ReadFilter};

/// Name of the standing read filter installed on tenant-aware types.
pub const TENANT_FILTER: &str = "tenant_isolation";

/// Schema and commit hooks for the discriminator strategy.
#[derive(Debug, Clone)]
pub struct DiscriminatorProcessor {
    tenant_field: String,
}

impl DiscriminatorProcessor {
    pub fn new(tenant_field: impl Into<String>) -> Self {
        Self {
            tenant_field: tenant_field.into(),
        }
    }

    #[must_use]
    pub fn tenant_field(&self) -> &str {
        &self.tenant_field
    }

    fn tenant_filter(&self) -> ReadFilter {
        let field = self.tenant_field.clone();
        ReadFilter::new(
            TENANT_FILTER,
            format!("{field} == @current_tenant"),
            move |record: &EntityRecord, scope: &FilterScope<'_>| {
                let tenant = scope.require_tenant()?;
                Ok(record.get_str(&field) == Some(tenant.as_str()))
            },
        )
        .requiring_tenant()
    }
}

impl FeatureProcessor for DiscriminatorProcessor {
    fn name(&self) -> &str {
        "multi_tenant"
    }

    fn on_schema_build_entity(
        &self,
        entity: &mut EntitySchemaBuilder,
    ) -> Result<(), TenantryError> {
        if !entity.descriptor().is_tenant_aware() {
            return Ok(());
        }
        tracing::debug!(
            entity = entity.descriptor().name(),
            field = %self.tenant_field,
            "installing tenant discriminator"
        );
        entity
            .required(&self.tenant_field)
            .has_index(&[self.tenant_field.as_str()], false)
            .has_query_filter(self.tenant_filter());
        Ok(())
    }

    /// Stamps the current tenant on every added tenant-aware row, overwriting
    /// whatever the caller set. Modified rows get their loaded tenant back, so
    /// an edit cannot move a row to another tenant.
    fn on_pre_commit(
        &self,
        changes: &mut ChangeSet,
        scope: &CommitScope,
    ) -> Result<(), TenantryError> {
        for entry in changes.iter_mut() {
            if !entry.descriptor().is_tenant_aware() {
                continue;
            }
            match entry.state() {
                EntityState::Added => {
                    let tenant = scope.require_tenant()?;
                    entry
                        .current_mut()
                        .set(&self.tenant_field, Value::from(tenant.as_str()));
                }
                EntityState::Modified => {
                    let loaded = entry
                        .original()
                        .and_then(|original| original.get(&self.tenant_field))
                        .cloned();
                    let current = entry.current_mut();
                    match loaded {
                        Some(tenant) => {
                            current.set(&self.tenant_field, tenant);
                        }
                        None => {
                            current.fields.remove(&self.tenant_field);
                        }
                    }
                }
                EntityState::Unchanged | EntityState::Deleted => {}
            }
        }
        Ok(())
    }
}
