//! Feature capability set: which cross-cutting features are enabled and how
//! they are configured.
//!
//! A [`FeatureSet`] is produced once by [`FeatureSetBuilder::build`] and then
//! shared read-only (usually behind an `Arc`) by every operation against the
//! contexts it configures. Configuration errors are raised by `build()`, never
//! at first use.
//!
//! [`FeaturesConfig`] is the serde mirror used to load features from a JSON
//! document; resolvers are attached in code afterwards.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::entity::fields;
use crate::error::TenantryError;
use crate::resolver::{TenantResolver, UserResolver};
use crate::types::{TenantId, UserId};

// ---------------------------------------------------------------------------
// Option types
// ---------------------------------------------------------------------------

/// Where a context instance points its store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Named in-memory database. Contexts using the same name share data.
    InMemory { database: String },
    /// Connection string handed to an external connector.
    Connection { uri: String },
}

impl StoreConfig {
    /// Shorthand for [`StoreConfig::InMemory`].
    pub fn in_memory(database: impl Into<String>) -> Self {
        StoreConfig::InMemory {
            database: database.into(),
        }
    }

    /// Shorthand for [`StoreConfig::Connection`].
    pub fn connection(uri: impl Into<String>) -> Self {
        StoreConfig::Connection { uri: uri.into() }
    }
}

/// Row-discrimination strategy: one shared store, a tenant column and a
/// standing read filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscriminatorConfig {
    /// The shared store.
    pub store: StoreConfig,
    /// Name of the discriminator field on tenant-aware entities.
    pub tenant_field: String,
}

/// Physical isolation strategy: one store per tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Store configuration per tenant. Never empty once built.
    pub tenants: BTreeMap<TenantId, StoreConfig>,
}

impl DatabaseConfig {
    /// Looks up the store for a tenant.
    #[must_use]
    pub fn store_for(&self, tenant: &TenantId) -> Option<&StoreConfig> {
        self.tenants.get(tenant)
    }
}

/// Multi-tenant isolation strategy, fixed at configuration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantStrategy {
    Discriminator(DiscriminatorConfig),
    Database(DatabaseConfig),
}

impl TenantStrategy {
    /// Short name used in logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            TenantStrategy::Discriminator(_) => "discriminator",
            TenantStrategy::Database(_) => "database",
        }
    }
}

/// What the auditing processor does when no user id can be resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingUserPolicy {
    /// Fail the commit with [`TenantryError::UserRequired`].
    #[default]
    Reject,
    /// Stamp the configured default user id (which may itself be absent).
    UseDefaultUser,
    /// Write null into the user fields, overwriting caller values.
    SaveAsNull,
    /// Leave the user fields untouched.
    SkipUserFields,
}

impl fmt::Display for MissingUserPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MissingUserPolicy::Reject => "Reject",
            MissingUserPolicy::UseDefaultUser => "UseDefaultUser",
            MissingUserPolicy::SaveAsNull => "SaveAsNull",
            MissingUserPolicy::SkipUserFields => "SkipUserFields",
        };
        f.write_str(s)
    }
}

/// Auditing feature configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditOptions {
    pub missing_user: MissingUserPolicy,
    /// Used by [`MissingUserPolicy::UseDefaultUser`].
    pub default_user_id: Option<UserId>,
}

/// Identity schema shape. Carried for hosts that install an identity
/// processor; no built-in processor consumes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityOptions {
    pub user_entity: String,
    pub role_entity: String,
    pub key_field: String,
    pub require_unique_email: bool,
}

impl Default for IdentityOptions {
    fn default() -> Self {
        Self {
            user_entity: "User".to_string(),
            role_entity: "Role".to_string(),
            key_field: "id".to_string(),
            require_unique_email: true,
        }
    }
}

// ---------------------------------------------------------------------------
// FeatureSet
// ---------------------------------------------------------------------------

/// Immutable description of the enabled features. Build with
/// [`FeatureSetBuilder`].
#[derive(Clone)]
pub struct FeatureSet {
    store: Option<StoreConfig>,
    multi_tenant: Option<TenantStrategy>,
    auditing: Option<AuditOptions>,
    identity: Option<IdentityOptions>,
    tenant_resolver: Option<Arc<dyn TenantResolver>>,
    user_resolver: Option<Arc<dyn UserResolver>>,
}

impl FeatureSet {
    /// Starts a new builder.
    #[must_use]
    pub fn builder() -> FeatureSetBuilder {
        FeatureSetBuilder::new()
    }

    /// Store used when multi-tenancy is disabled.
    #[must_use]
    pub fn store(&self) -> Option<&StoreConfig> {
        self.store.as_ref()
    }

    /// Active multi-tenant strategy, or `None` when multi-tenancy is off.
    #[must_use]
    pub fn multi_tenant(&self) -> Option<&TenantStrategy> {
        self.multi_tenant.as_ref()
    }

    #[must_use]
    pub fn auditing(&self) -> Option<&AuditOptions> {
        self.auditing.as_ref()
    }

    #[must_use]
    pub fn identity(&self) -> Option<&IdentityOptions> {
        self.identity.as_ref()
    }

    #[must_use]
    pub fn tenant_resolver(&self) -> Option<&dyn TenantResolver> {
        self.tenant_resolver.as_deref()
    }

    #[must_use]
    pub fn user_resolver(&self) -> Option<&dyn UserResolver> {
        self.user_resolver.as_deref()
    }
}

impl fmt::Debug for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureSet")
            .field("store", &self.store)
            .field("multi_tenant", &self.multi_tenant)
            .field("auditing", &self.auditing)
            .field("identity", &self.identity)
            .field("tenant_resolver", &self.tenant_resolver.is_some())
            .field("user_resolver", &self.user_resolver.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum PendingStrategy {
    Discriminator(StoreConfig),
    Database,
}

/// Fluent builder for [`FeatureSet`].
///
/// Re-enabling a feature overwrites its previous configuration. The
/// per-tenant store map is the exception: [`add_tenant`](Self::add_tenant)
/// accumulates, last write wins per tenant id.
#[derive(Default)]
pub struct FeatureSetBuilder {
    store: Option<StoreConfig>,
    strategy: Option<PendingStrategy>,
    tenant_field: Option<String>,
    tenants: BTreeMap<TenantId, StoreConfig>,
    auditing: Option<AuditOptions>,
    identity: Option<IdentityOptions>,
    tenant_resolver: Option<Arc<dyn TenantResolver>>,
    user_resolver: Option<Arc<dyn UserResolver>>,
}

impl FeatureSetBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store used when multi-tenancy is disabled.
    #[must_use]
    pub fn use_store(mut self, store: StoreConfig) -> Self {
        self.store = Some(store);
        self
    }

    /// Enables row-discrimination tenancy over the given shared store.
    #[must_use]
    pub fn multi_tenant_by_discriminator(mut self, store: StoreConfig) -> Self {
        self.strategy = Some(PendingStrategy::Discriminator(store));
        self.tenant_field = None;
        self
    }

    /// Enables per-tenant store tenancy. Register tenants with
    /// [`add_tenant`](Self::add_tenant).
    #[must_use]
    pub fn multi_tenant_by_database(mut self) -> Self {
        self.strategy = Some(PendingStrategy::Database);
        self
    }

    /// Overrides the discriminator field name (default `tenant_id`).
    #[must_use]
    pub fn tenant_field(mut self, field: impl Into<String>) -> Self {
        self.tenant_field = Some(field.into());
        self
    }

    /// Maps a tenant to its dedicated store.
    #[must_use]
    pub fn add_tenant(mut self, tenant: impl Into<TenantId>, store: StoreConfig) -> Self {
        self.tenants.insert(tenant.into(), store);
        self
    }

    #[must_use]
    pub fn disable_multi_tenant(mut self) -> Self {
        self.strategy = None;
        self.tenant_field = None;
        self
    }

    /// Enables auditing with the given missing-user policy.
    #[must_use]
    pub fn auditing(self, missing_user: MissingUserPolicy) -> Self {
        self.auditing_with(AuditOptions {
            missing_user,
            default_user_id: None,
        })
    }

    #[must_use]
    pub fn auditing_with(mut self, options: AuditOptions) -> Self {
        self.auditing = Some(options);
        self
    }

    /// Sets the default user for [`MissingUserPolicy::UseDefaultUser`].
    ///
    /// Enables auditing with that policy if auditing is not yet enabled.
    #[must_use]
    pub fn default_user(mut self, user: impl Into<UserId>) -> Self {
        let options = self.auditing.get_or_insert_with(|| AuditOptions {
            missing_user: MissingUserPolicy::UseDefaultUser,
            default_user_id: None,
        });
        options.default_user_id = Some(user.into());
        self
    }

    #[must_use]
    pub fn identity(mut self, options: IdentityOptions) -> Self {
        self.identity = Some(options);
        self
    }

    /// Sets the active tenant resolver, replacing any previous one.
    #[must_use]
    pub fn resolve_tenant_with(mut self, resolver: impl TenantResolver + 'static) -> Self {
        self.tenant_resolver = Some(Arc::new(resolver));
        self
    }

    /// Sets the active user resolver, replacing any previous one.
    #[must_use]
    pub fn resolve_user_with(mut self, resolver: impl UserResolver + 'static) -> Self {
        self.user_resolver = Some(Arc::new(resolver));
        self
    }

    /// Validates and freezes the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TenantryError::Configuration`] when:
    /// - the database strategy is enabled with no tenants,
    /// - the discriminator field name is empty,
    /// - multi-tenancy is off and no store was configured.
    pub fn build(self) -> Result<FeatureSet, TenantryError> {
        let multi_tenant = match self.strategy {
            Some(PendingStrategy::Discriminator(store)) => {
                if !self.tenants.is_empty() {
                    tracing::warn!(
                        tenants = self.tenants.len(),
                        "per-tenant stores ignored under the discriminator strategy"
                    );
                }
                let tenant_field = self
                    .tenant_field
                    .unwrap_or_else(|| fields::TENANT_ID.to_string());
                if tenant_field.is_empty() {
                    return Err(TenantryError::Configuration(
                        "discriminator tenant field name must not be empty".to_string(),
                    ));
                }
                Some(TenantStrategy::Discriminator(DiscriminatorConfig {
                    store,
                    tenant_field,
                }))
            }
            Some(PendingStrategy::Database) => {
                if self.tenants.is_empty() {
                    return Err(TenantryError::Configuration(
                        "database tenancy requires at least one tenant store".to_string(),
                    ));
                }
                Some(TenantStrategy::Database(DatabaseConfig {
                    tenants: self.tenants,
                }))
            }
            None => {
                if !self.tenants.is_empty() {
                    tracing::warn!(
                        tenants = self.tenants.len(),
                        "per-tenant stores ignored: multi-tenancy is disabled"
                    );
                }
                if self.store.is_none() {
                    return Err(TenantryError::Configuration(
                        "no store configured".to_string(),
                    ));
                }
                None
            }
        };

        Ok(FeatureSet {
            store: self.store,
            multi_tenant,
            auditing: self.auditing,
            identity: self.identity,
            tenant_resolver: self.tenant_resolver,
            user_resolver: self.user_resolver,
        })
    }
}

// ---------------------------------------------------------------------------
// File configuration
// ---------------------------------------------------------------------------

/// Multi-tenant section of [`FeaturesConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum MultiTenantConfig {
    Discriminator {
        store: StoreConfig,
        #[serde(default)]
        tenant_field: Option<String>,
    },
    Database {
        tenants: BTreeMap<TenantId, StoreConfig>,
    },
}

/// Serializable mirror of the feature capability set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeaturesConfig {
    pub store: Option<StoreConfig>,
    pub multi_tenant: Option<MultiTenantConfig>,
    pub auditing: Option<AuditOptions>,
    pub identity: Option<IdentityOptions>,
}

impl FeaturesConfig {
    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`TenantryError::Configuration`] with the parser message.
    pub fn from_json(json: &str) -> Result<Self, TenantryError> {
        serde_json::from_str(json).map_err(|e| TenantryError::Configuration(e.to_string()))
    }

    /// Converts into a builder so resolvers can be attached before `build()`.
    #[must_use]
    pub fn into_builder(self) -> FeatureSetBuilder {
        let mut builder = FeatureSetBuilder::new();
        if let Some(store) = self.store {
            builder = builder.use_store(store);
        }
        match self.multi_tenant {
            Some(MultiTenantConfig::Discriminator {
                store,
                tenant_field,
            }) => {
                builder = builder.multi_tenant_by_discriminator(store);
                if let Some(field) = tenant_field {
                    builder = builder.tenant_field(field);
                }
            }
            Some(MultiTenantConfig::Database { tenants }) => {
                builder = builder.multi_tenant_by_database();
                for (tenant, store) in tenants {
                    builder = builder.add_tenant(tenant, store);
                }
            }
            None => {}
        }
        if let Some(auditing) = self.auditing {
            builder = builder.auditing_with(auditing);
        }
        if let Some(identity) = self.identity {
            builder = builder.identity(identity);
        }
        builder
    }
}
