//! Audit stamping: creation and modification dates on auditable types, and
//! creator/modifier user ids on user-audited types.
//!
//! Timestamps are `Value::Int` milliseconds from the injected
//! [`ClockSource`]. On modification the stored creation fields are restored
//! from the loaded row, and the modification stamp is forced strictly past
//! the previous one so that edits within a single clock tick still order.

use std::sync::Arc;

use tenantry_core::{
    fields, AuditOptions, ClockSource, EntityRecord, EntityState, MissingUserPolicy,
    TenantryError, Value,
};

use crate::changes::{ChangeSet, EntityEntry};
use crate::processor::{CommitScope, FeatureProcessor};
use crate::schema::EntitySchemaBuilder;

/// What to write into the user fields of one entry.
enum UserStamp {
    Write(Value),
    Skip,
}

/// Processor for the auditing feature.
pub struct AuditingProcessor {
    options: AuditOptions,
    clock: Arc<dyn ClockSource>,
}

impl AuditingProcessor {
    #[must_use]
    pub fn new(options: AuditOptions, clock: Arc<dyn ClockSource>) -> Self {
        Self { options, clock }
    }

    #[must_use]
    pub fn options(&self) -> &AuditOptions {
        &self.options
    }

    fn now(&self) -> i64 {
        i64::try_from(self.clock.now()).unwrap_or(i64::MAX)
    }

    /// Resolves the user stamp for this commit. An empty user id counts as
    /// missing.
    fn user_stamp(&self, scope: &CommitScope) -> Result<UserStamp, TenantryError> {
        if let Some(user) = scope.user().filter(|u| !u.is_empty()) {
            return Ok(UserStamp::Write(Value::from(user.as_str())));
        }
        match self.options.missing_user {
            MissingUserPolicy::Reject => Err(TenantryError::UserRequired {
                policy: self.options.missing_user,
            }),
            MissingUserPolicy::UseDefaultUser => Ok(UserStamp::Write(
                self.options
                    .default_user_id
                    .as_ref()
                    .map_or(Value::Null, |u| Value::from(u.as_str())),
            )),
            MissingUserPolicy::SaveAsNull => Ok(UserStamp::Write(Value::Null)),
            MissingUserPolicy::SkipUserFields => Ok(UserStamp::Skip),
        }
    }

    fn stamp_added(
        &self,
        entry: &mut EntityEntry,
        scope: &CommitScope,
    ) -> Result<(), TenantryError> {
        let now = self.now();
        let has_user = entry.descriptor().has_audit_user();
        let record = entry.current_mut();
        record.set(fields::CREATED_DATE, now);
        record.set(fields::LAST_MODIFIED_DATE, now);
        if has_user {
            if let UserStamp::Write(user) = self.user_stamp(scope)? {
                record.set(fields::CREATED_BY, user.clone());
                record.set(fields::MODIFIED_BY, user);
            }
        }
        Ok(())
    }

    fn stamp_modified(
        &self,
        entry: &mut EntityEntry,
        scope: &CommitScope,
    ) -> Result<(), TenantryError> {
        let has_user = entry.descriptor().has_audit_user();
        let original = entry.original().cloned().unwrap_or_default();
        let previous = original
            .get(fields::LAST_MODIFIED_DATE)
            .and_then(Value::as_int);
        let now = self.now();
        let stamp = previous.map_or(now, |prev| now.max(prev.saturating_add(1)));

        let record = entry.current_mut();
        restore(record, &original, fields::CREATED_DATE);
        record.set(fields::LAST_MODIFIED_DATE, stamp);
        if has_user {
            restore(record, &original, fields::CREATED_BY);
            if let UserStamp::Write(user) = self.user_stamp(scope)? {
                record.set(fields::MODIFIED_BY, user);
            }
        }
        Ok(())
    }
}

/// Copies `field` from the loaded row back onto the pending row.
fn restore(record: &mut EntityRecord, original: &EntityRecord, field: &str) {
    if let Some(value) = original.get(field) {
        record.set(field, value.clone());
    }
}

impl FeatureProcessor for AuditingProcessor {
    fn name(&self) -> &str {
        "auditing"
    }

    fn on_schema_build_entity(
        &self,
        entity: &mut EntitySchemaBuilder,
    ) -> Result<(), TenantryError> {
        let descriptor = Arc::clone(entity.descriptor());
        if !descriptor.is_auditable() {
            return Ok(());
        }
        entity
            .required(fields::CREATED_DATE)
            .required(fields::LAST_MODIFIED_DATE);
        if descriptor.has_audit_user() {
            entity.property(fields::CREATED_BY);
            entity.property(fields::MODIFIED_BY);
        }
        tracing::debug!(
            entity = descriptor.name(),
            audit_user = descriptor.has_audit_user(),
            "installing audit fields"
        );
        Ok(())
    }

    fn on_pre_commit(
        &self,
        changes: &mut ChangeSet,
        scope: &CommitScope,
    ) -> Result<(), TenantryError> {
        for entry in changes.iter_mut() {
            if !entry.descriptor().is_auditable() {
                continue;
            }
            match entry.state() {
                EntityState::Added => self.stamp_added(entry, scope)?,
                EntityState::Modified => self.stamp_modified(entry, scope)?,
                EntityState::Unchanged | EntityState::Deleted => {}
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for AuditingProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditingProcessor")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
