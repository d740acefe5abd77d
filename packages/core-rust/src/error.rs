use crate::features::MissingUserPolicy;
use crate::types::TenantId;

/// Errors surfaced by the feature layer.
///
/// Display strings are stable: callers and tests match on them verbatim.
#[derive(Debug, thiserror::Error)]
pub enum TenantryError {
    /// Construction-time misconfiguration. Raised before any operation is served.
    #[error("invalid feature configuration: {0}")]
    Configuration(String),
    /// A tenant id was required but the operation has none.
    #[error("Current tenant ID is not set")]
    TenantNotSet,
    /// Database strategy: the tenant id is known but has no store mapping.
    #[error("no store configuration registered for tenant '{tenant_id}'")]
    TenantNotConfigured { tenant_id: TenantId },
    /// Auditing rejected a commit because no user id could be resolved.
    #[error("Current user ID is required when the missing-user policy is {policy}")]
    UserRequired { policy: MissingUserPolicy },
    /// A resolver failed internally (not the same as "not found").
    #[error("resolver failed: {0}")]
    Resolver(#[source] anyhow::Error),
    #[error("entity type '{0}' is not registered")]
    UnknownEntityType(String),
    #[error("entity '{entity_type}/{key}' not found")]
    EntityNotFound { entity_type: String, key: String },
    /// An added row collides with a row already in the store.
    #[error("entity '{entity_type}/{key}' already exists")]
    DuplicateKey { entity_type: String, key: String },
    #[error("required field '{field}' missing on '{entity_type}'")]
    MissingField { entity_type: String, field: String },
    /// Failure inside the underlying store or its connector.
    #[error("store error: {0}")]
    Store(#[source] anyhow::Error),
}
