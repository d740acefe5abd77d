//! Tenantry core: ids, entity descriptors, ambient operation context,
//! resolvers, and the feature capability set shared by every persistence
//! context.

pub mod ambient;
pub mod clock;
pub mod entity;
pub mod error;
pub mod features;
pub mod resolver;
pub mod types;

pub use ambient::{run_operation, run_operation_async, AmbientContext, AmbientScope};
pub use clock::{ClockSource, ManualClock, SystemClock};
pub use entity::{fields, EntityCapabilities, EntityDescriptor, EntityState};
pub use error::TenantryError;
pub use features::{
    AuditOptions, DatabaseConfig, DiscriminatorConfig, FeatureSet, FeatureSetBuilder,
    FeaturesConfig, IdentityOptions, MissingUserPolicy, MultiTenantConfig, StoreConfig,
    TenantStrategy,
};
pub use resolver::{
    FnResolver, MetadataKeyResolver, NoMetadata, OperationMetadata, StaticResolver,
    TenantResolver, UserResolver,
};
pub use types::{EntityRecord, TenantId, UserId, Value};
