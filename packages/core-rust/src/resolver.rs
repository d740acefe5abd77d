//! Pluggable strategies that derive the current tenant and user from an
//! inbound operation.
//!
//! Resolvers read whatever per-operation metadata the host exposes through
//! [`OperationMetadata`]. Transport concerns (headers, claims, query strings)
//! all reduce to a key lookup, so [`MetadataKeyResolver`] covers them; custom
//! logic goes through [`FnResolver`].
//!
//! "Not found" is `Ok(None)`. An empty string is a present, empty id. `Err`
//! is reserved for faults inside the resolver itself.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::types::{TenantId, UserId};

/// Read-only view over per-operation metadata.
pub trait OperationMetadata {
    /// Returns the string stored under `key`, if any.
    fn try_get_string(&self, key: &str) -> Option<String>;
}

impl OperationMetadata for HashMap<String, String> {
    fn try_get_string(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl OperationMetadata for BTreeMap<String, String> {
    fn try_get_string(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Metadata with no entries, for operations that carry no inbound context.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMetadata;

impl OperationMetadata for NoMetadata {
    fn try_get_string(&self, _key: &str) -> Option<String> {
        None
    }
}

/// Derives the tenant id for an operation.
pub trait TenantResolver: Send + Sync {
    /// # Errors
    ///
    /// Returns an error only for resolver-internal faults.
    fn resolve_tenant_id(&self, metadata: &dyn OperationMetadata)
        -> anyhow::Result<Option<TenantId>>;
}

/// Derives the acting user id for an operation.
pub trait UserResolver: Send + Sync {
    /// # Errors
    ///
    /// Returns an error only for resolver-internal faults.
    fn resolve_user_id(&self, metadata: &dyn OperationMetadata) -> anyhow::Result<Option<UserId>>;
}

/// Resolves an id by reading a single metadata key.
///
/// The key is host-defined: a header name, a claim type, a query parameter.
#[derive(Debug, Clone)]
pub struct MetadataKeyResolver {
    key: String,
}

impl MetadataKeyResolver {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// The metadata key this resolver reads.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl TenantResolver for MetadataKeyResolver {
    fn resolve_tenant_id(
        &self,
        metadata: &dyn OperationMetadata,
    ) -> anyhow::Result<Option<TenantId>> {
        Ok(metadata.try_get_string(&self.key).map(TenantId::new))
    }
}

impl UserResolver for MetadataKeyResolver {
    fn resolve_user_id(&self, metadata: &dyn OperationMetadata) -> anyhow::Result<Option<UserId>> {
        Ok(metadata.try_get_string(&self.key).map(UserId::new))
    }
}

type ResolveFn = dyn Fn(&dyn OperationMetadata) -> anyhow::Result<Option<String>> + Send + Sync;

/// Resolver backed by a closure, for custom resolution logic.
#[derive(Clone)]
pub struct FnResolver {
    f: Arc<ResolveFn>,
}

impl FnResolver {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&dyn OperationMetadata) -> anyhow::Result<Option<String>> + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }
}

impl fmt::Debug for FnResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnResolver").finish_non_exhaustive()
    }
}

impl TenantResolver for FnResolver {
    fn resolve_tenant_id(
        &self,
        metadata: &dyn OperationMetadata,
    ) -> anyhow::Result<Option<TenantId>> {
        Ok((self.f)(metadata)?.map(TenantId::new))
    }
}

impl UserResolver for FnResolver {
    fn resolve_user_id(&self, metadata: &dyn OperationMetadata) -> anyhow::Result<Option<UserId>> {
        Ok((self.f)(metadata)?.map(UserId::new))
    }
}

/// Resolver that always yields the same value. Useful for background jobs.
#[derive(Debug, Clone)]
pub struct StaticResolver {
    value: Option<String>,
}

impl StaticResolver {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
        }
    }

    /// A resolver that never finds anything.
    #[must_use]
    pub fn none() -> Self {
        Self { value: None }
    }
}

impl TenantResolver for StaticResolver {
    fn resolve_tenant_id(&self, _: &dyn OperationMetadata) -> anyhow::Result<Option<TenantId>> {
        Ok(self.value.clone().map(TenantId::new))
    }
}

impl UserResolver for StaticResolver {
    fn resolve_user_id(&self, _: &dyn OperationMetadata) -> anyhow::Result<Option<UserId>> {
        Ok(self.value.clone().map(UserId::new))
    }
}
