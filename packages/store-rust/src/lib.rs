//! Tenantry store layer: persistence contexts with pluggable feature
//! processors for multi-tenant isolation and audit stamping.
//!
//! - [`registry`]: entity types and their schema configuration
//! - [`schema`]: model builder, frozen model and read filters
//! - [`processor`]: feature processor trait and ordered pipeline
//! - [`tenancy`]: discriminator processor, per-tenant factory, context provider
//! - [`audit`]: audit stamping processor
//! - [`context`]: unit of work handed to each operation
//! - [`store`]: store engine and connector, with in-memory implementations

pub mod audit;
pub mod changes;
pub mod context;
pub mod processor;
pub mod registry;
pub mod schema;
pub mod store;
pub mod tenancy;

pub use audit::AuditingProcessor;
pub use changes::{ChangeSet, EntityEntry};
pub use context::{PersistenceContext, StoreBinding};
pub use processor::{CommitScope, FeatureProcessor, ProcessorPipeline};
pub use registry::{EntityRegistration, EntityRegistry};
pub use schema::{
    EntitySchema, EntitySchemaBuilder, FieldDef, FilterScope, IndexDef, Model, ModelBuilder,
    ReadFilter,
};
pub use store::{MemoryConnector, MemoryStore, StoreConnector, StoreEngine};
pub use tenancy::{
    ContextProvider, ContextProviderBuilder, DiscriminatorProcessor, TenantContextFactory,
};
