//! Entity type descriptors and change-tracking states.
//!
//! Capabilities are declared once per entity type at registration and
//! memoized into an [`EntityDescriptor`]. Processors consult the descriptor
//! instead of inspecting entity instances at commit time.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Well-known field names written by the built-in processors.
pub mod fields {
    /// Default discriminator field for tenant-aware entities.
    pub const TENANT_ID: &str = "tenant_id";
    /// Set once when the entity is first persisted.
    pub const CREATED_DATE: &str = "created_date";
    /// Set on first persist and on every update.
    pub const LAST_MODIFIED_DATE: &str = "last_modified_date";
    /// User that first persisted the entity.
    pub const CREATED_BY: &str = "created_by";
    /// User that last modified the entity.
    pub const MODIFIED_BY: &str = "modified_by";
}

/// Tagged set of cross-cutting capabilities an entity type declares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct EntityCapabilities {
    /// Rows carry a tenant id and are isolated per tenant.
    pub tenant_aware: bool,
    /// Rows carry creation and modification timestamps.
    pub auditable: bool,
    /// Rows additionally carry creating and modifying user ids.
    pub audit_user: bool,
}

impl EntityCapabilities {
    /// No capabilities.
    pub const NONE: Self = Self {
        tenant_aware: false,
        auditable: false,
        audit_user: false,
    };

    /// Adds the tenant-aware capability.
    #[must_use]
    pub const fn tenant_aware(mut self) -> Self {
        self.tenant_aware = true;
        self
    }

    /// Adds the auditable (timestamps only) capability.
    #[must_use]
    pub const fn auditable(mut self) -> Self {
        self.auditable = true;
        self
    }

    /// Adds the auditable-with-user capability. Implies [`auditable`](Self::auditable).
    #[must_use]
    pub const fn audit_user(mut self) -> Self {
        self.auditable = true;
        self.audit_user = true;
        self
    }
}

/// Memoized per-type descriptor used as the processors' dispatch table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityDescriptor {
    name: String,
    capabilities: EntityCapabilities,
}

impl EntityDescriptor {
    /// Creates a descriptor for the named entity type.
    pub fn new(name: impl Into<String>, capabilities: EntityCapabilities) -> Self {
        Self {
            name: name.into(),
            capabilities,
        }
    }

    /// Entity type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared capabilities.
    #[must_use]
    pub fn capabilities(&self) -> EntityCapabilities {
        self.capabilities
    }

    #[must_use]
    pub fn is_tenant_aware(&self) -> bool {
        self.capabilities.tenant_aware
    }

    #[must_use]
    pub fn is_auditable(&self) -> bool {
        self.capabilities.auditable
    }

    #[must_use]
    pub fn has_audit_user(&self) -> bool {
        self.capabilities.audit_user
    }
}

/// Transition kind of a tracked entity in the pending-change set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityState {
    /// New row, not yet in the store.
    Added,
    /// Existing row with pending changes.
    Modified,
    /// Tracked but not changed.
    Unchanged,
    /// Existing row pending removal.
    Deleted,
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityState::Added => "added",
            EntityState::Modified => "modified",
            EntityState::Unchanged => "unchanged",
            EntityState::Deleted => "deleted",
        };
        f.write_str(s)
    }
}
