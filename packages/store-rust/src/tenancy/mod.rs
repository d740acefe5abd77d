//! Multi-tenant strategy engine.

pub mod discriminator;
pub mod factory;
pub mod provider;

pub use discriminator::{DiscriminatorProcessor, TENANT_FILTER};
pub use factory::TenantContextFactory;
pub use provider::{ContextProvider, ContextProviderBuilder};
