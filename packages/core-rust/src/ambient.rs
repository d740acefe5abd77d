//! Per-operation ambient state: the current tenant and the current user.
//!
//! Every inbound operation owns its own [`AmbientContext`]. There is no
//! process-wide cell; components that need the ambient values receive the
//! operation's context explicitly (usually as an `Arc<AmbientContext>` held by
//! the persistence context). [`AmbientScope`] owns the context for the
//! lifetime of the operation and clears it on every exit path, including
//! early returns, panics and dropped futures.

use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::TenantryError;
use crate::features::FeatureSet;
use crate::resolver::OperationMetadata;
use crate::types::{TenantId, UserId};

/// Holder for the current tenant id and user id of a single operation.
///
/// Written once near the start of the operation (by a resolver), read any
/// number of times, cleared when the operation ends.
#[derive(Debug, Default)]
pub struct AmbientContext {
    tenant: RwLock<Option<TenantId>>,
    user: RwLock<Option<UserId>>,
}

impl AmbientContext {
    /// Creates an empty context. Both slots are unset.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context with the tenant slot already populated.
    #[must_use]
    pub fn with_tenant(tenant: TenantId) -> Self {
        let ctx = Self::new();
        ctx.set_tenant(tenant);
        ctx
    }

    pub fn set_tenant(&self, tenant: TenantId) {
        *self.tenant.write() = Some(tenant);
    }

    /// Returns the current tenant, or `None` if unset.
    #[must_use]
    pub fn tenant(&self) -> Option<TenantId> {
        self.tenant.read().clone()
    }

    pub fn set_user(&self, user: UserId) {
        *self.user.write() = Some(user);
    }

    /// Returns the current user, or `None` if unset.
    #[must_use]
    pub fn user(&self) -> Option<UserId> {
        self.user.read().clone()
    }

    /// Unsets both slots.
    pub fn clear(&self) {
        *self.tenant.write() = None;
        *self.user.write() = None;
    }
}

/// Owner of one operation's [`AmbientContext`].
///
/// Dropping the scope clears the context, so any component still holding a
/// reference observes "unset" rather than a stale tenant.
#[derive(Debug)]
pub struct AmbientScope {
    ctx: Arc<AmbientContext>,
}

impl AmbientScope {
    /// Starts an operation with an empty ambient context.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ctx: Arc::new(AmbientContext::new()),
        }
    }

    /// Starts an operation and populates the context from the feature set's
    /// active resolvers.
    ///
    /// # Errors
    ///
    /// Returns [`TenantryError::Resolver`] if a resolver fails internally.
    /// A resolver that finds nothing leaves the slot unset.
    pub fn resolve(
        features: &FeatureSet,
        metadata: &dyn OperationMetadata,
    ) -> Result<Self, TenantryError> {
        let scope = Self::new();
        if let Some(resolver) = features.tenant_resolver() {
            if let Some(tenant) = resolver
                .resolve_tenant_id(metadata)
                .map_err(TenantryError::Resolver)?
            {
                scope.ctx.set_tenant(tenant);
            }
        }
        if let Some(resolver) = features.user_resolver() {
            if let Some(user) = resolver
                .resolve_user_id(metadata)
                .map_err(TenantryError::Resolver)?
            {
                scope.ctx.set_user(user);
            }
        }
        tracing::debug!(
            tenant = ?scope.ctx.tenant(),
            user = ?scope.ctx.user(),
            "ambient context resolved"
        );
        Ok(scope)
    }

    /// Shared handle to this operation's context.
    #[must_use]
    pub fn context(&self) -> &Arc<AmbientContext> {
        &self.ctx
    }
}

impl Default for AmbientScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AmbientScope {
    fn drop(&mut self) {
        self.ctx.clear();
    }
}

/// Runs `body` inside a freshly resolved ambient scope.
///
/// The scope is cleared when `body` returns, whether it succeeded or not.
///
/// # Errors
///
/// Returns resolver failures, or whatever `body` returns.
pub fn run_operation<T, F>(
    features: &FeatureSet,
    metadata: &dyn OperationMetadata,
    body: F,
) -> Result<T, TenantryError>
where
    F: FnOnce(&Arc<AmbientContext>) -> Result<T, TenantryError>,
{
    let scope = AmbientScope::resolve(features, metadata)?;
    body(scope.context())
}

/// Async counterpart of [`run_operation`]. Executor-agnostic.
///
/// The scope lives inside the returned future, so cancelling the future
/// (dropping it before completion) also clears the context.
///
/// # Errors
///
/// Returns resolver failures, or whatever `body` resolves to.
pub async fn run_operation_async<T, F, Fut>(
    features: &FeatureSet,
    metadata: &(dyn OperationMetadata + Sync),
    body: F,
) -> Result<T, TenantryError>
where
    F: FnOnce(Arc<AmbientContext>) -> Fut,
    Fut: Future<Output = Result<T, TenantryError>>,
{
    let scope = AmbientScope::resolve(features, metadata)?;
    body(Arc::clone(scope.context())).await
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::features::{FeatureSetBuilder, StoreConfig};
    use crate::resolver::{FnResolver, MetadataKeyResolver, NoMetadata};

    fn features() -> FeatureSet {
        FeatureSetBuilder::new()
            .use_store(StoreConfig::in_memory("main"))
            .resolve_tenant_with(MetadataKeyResolver::new("x-tenant-id"))
            .resolve_user_with(MetadataKeyResolver::new("sub"))
            .build()
            .expect("valid features")
    }

    #[test]
    fn get_before_set_is_unset() {
        let ctx = AmbientContext::new();
        assert!(ctx.tenant().is_none());
        assert!(ctx.user().is_none());
    }

    #[test]
    fn set_get_clear() {
        let ctx = AmbientContext::new();
        ctx.set_tenant(TenantId::new("a"));
        ctx.set_user(UserId::new("u"));
        assert_eq!(ctx.tenant(), Some(TenantId::new("a")));
        assert_eq!(ctx.user(), Some(UserId::new("u")));
        ctx.clear();
        assert!(ctx.tenant().is_none());
        assert!(ctx.user().is_none());
    }

    #[test]
    fn scope_populates_from_resolvers() {
        let meta: HashMap<String, String> = [
            ("x-tenant-id".to_string(), "acme".to_string()),
            ("sub".to_string(), "alice".to_string()),
        ]
        .into_iter()
        .collect();
        let scope = AmbientScope::resolve(&features(), &meta).unwrap();
        assert_eq!(scope.context().tenant(), Some(TenantId::new("acme")));
        assert_eq!(scope.context().user(), Some(UserId::new("alice")));
    }

    #[test]
    fn scope_clears_on_drop() {
        let scope = AmbientScope::new();
        scope.context().set_tenant(TenantId::new("a"));
        let leaked = Arc::clone(scope.context());
        drop(scope);
        assert!(leaked.tenant().is_none());
    }

    #[test]
    fn run_operation_clears_after_error() {
        let meta: HashMap<String, String> =
            [("x-tenant-id".to_string(), "acme".to_string())].into_iter().collect();
        let mut captured = None;
        let result: Result<(), _> = run_operation(&features(), &meta, |ctx| {
            captured = Some(Arc::clone(ctx));
            assert_eq!(ctx.tenant(), Some(TenantId::new("acme")));
            Err(TenantryError::TenantNotSet)
        });
        assert!(result.is_err());
        assert!(captured.unwrap().tenant().is_none());
    }

    #[test]
    fn resolver_fault_surfaces_as_resolver_error() {
        let features = FeatureSetBuilder::new()
            .use_store(StoreConfig::in_memory("main"))
            .resolve_tenant_with(FnResolver::new(|_| Err(anyhow::anyhow!("boom"))))
            .build()
            .unwrap();
        let err = AmbientScope::resolve(&features, &NoMetadata).unwrap_err();
        assert!(matches!(err, TenantryError::Resolver(_)));
    }

    #[tokio::test]
    async fn cancelled_async_operation_still_clears() {
        let features = features();
        let meta: HashMap<String, String> =
            [("x-tenant-id".to_string(), "acme".to_string())].into_iter().collect();
        let (tx, rx) = tokio::sync::oneshot::channel();

        let fut = run_operation_async(&features, &meta, |ctx| async move {
            let _ = tx.send(Arc::clone(&ctx));
            std::future::pending::<()>().await;
            Ok(())
        });
        // Poll once so the body starts, then drop the future.
        let outcome = tokio::time::timeout(std::time::Duration::from_millis(20), fut).await;
        assert!(outcome.is_err());

        let ctx = rx.await.unwrap();
        assert!(ctx.tenant().is_none());
    }
}
