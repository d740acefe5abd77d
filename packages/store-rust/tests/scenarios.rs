//! End-to-end behavior of the feature pipeline across both tenancy
//! strategies and the auditing policies.

use std::collections::HashMap;
use std::sync::Arc;

use proptest::prelude::*;
use tenantry_core::{
    fields, run_operation, AmbientContext, ClockSource, EntityCapabilities, EntityRecord,
    FeatureSet, ManualClock, MetadataKeyResolver, MissingUserPolicy, StoreConfig, TenantId,
    TenantryError, UserId, Value,
};
use tenantry_store::{ContextProvider, EntityRegistry, MemoryConnector, ProcessorPipeline, StoreEngine};

fn registry() -> Arc<EntityRegistry> {
    Arc::new(
        EntityRegistry::new()
            .register_with(
                "Product",
                EntityCapabilities::NONE.tenant_aware(),
                |entity| {
                    entity.required("name");
                },
            )
            .register("Order", EntityCapabilities::NONE.tenant_aware().audit_user())
            .register("Country", EntityCapabilities::NONE),
    )
}

fn discriminator_features() -> FeatureSet {
    FeatureSet::builder()
        .multi_tenant_by_discriminator(StoreConfig::in_memory("shared"))
        .resolve_tenant_with(MetadataKeyResolver::new("x-tenant-id"))
        .resolve_user_with(MetadataKeyResolver::new("sub"))
        .build()
        .unwrap()
}

fn database_features() -> FeatureSet {
    FeatureSet::builder()
        .multi_tenant_by_database()
        .add_tenant("tenant1", StoreConfig::in_memory("tenant1"))
        .add_tenant("tenant2", StoreConfig::in_memory("tenant2"))
        .build()
        .unwrap()
}

fn provider(features: FeatureSet) -> ContextProvider {
    ContextProvider::builder(Arc::new(features), registry())
        .connector(Arc::new(MemoryConnector::new()))
        .build()
        .unwrap()
}

fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

fn names(rows: &[EntityRecord]) -> Vec<&str> {
    rows.iter().filter_map(|r| r.get_str("name")).collect()
}

// ---------------------------------------------------------------------------
// Tenancy
// ---------------------------------------------------------------------------

#[test]
fn discriminator_reads_exclude_other_tenants_rows() {
    let provider = provider(discriminator_features());

    run_operation(
        provider.features(),
        &headers(&[("x-tenant-id", "tenant1")]),
        |ambient| {
            let mut ctx = provider.context(ambient, None)?;
            ctx.add("Product", EntityRecord::new("").with("name", "X"))?;
            ctx.save_changes()
        },
    )
    .unwrap();

    let seen_by_tenant2 = run_operation(
        provider.features(),
        &headers(&[("x-tenant-id", "tenant2")]),
        |ambient| provider.context(ambient, None)?.query("Product"),
    )
    .unwrap();
    assert!(seen_by_tenant2.is_empty());

    let seen_by_tenant1 = run_operation(
        provider.features(),
        &headers(&[("x-tenant-id", "tenant1")]),
        |ambient| provider.context(ambient, None)?.query("Product"),
    )
    .unwrap();
    assert_eq!(names(&seen_by_tenant1), vec!["X"]);
    assert_eq!(seen_by_tenant1[0].get_str(fields::TENANT_ID), Some("tenant1"));
}

#[test]
fn discriminator_read_without_tenant_fails_even_when_empty() {
    let provider = provider(discriminator_features());
    let err = run_operation(provider.features(), &headers(&[]), |ambient| {
        provider.context(ambient, None)?.query("Product")
    })
    .unwrap_err();
    assert_eq!(err.to_string(), "Current tenant ID is not set");
}

#[test]
fn discriminator_leaves_shared_types_unfiltered() {
    let provider = provider(discriminator_features());
    let ambient = Arc::new(AmbientContext::new());
    let mut ctx = provider.context(&ambient, None).unwrap();
    ctx.add("Country", EntityRecord::new("se").with("name", "Sweden"))
        .unwrap();
    ctx.save_changes().unwrap();

    assert_eq!(names(&ctx.query("Country").unwrap()), vec!["Sweden"]);
}

#[test]
fn caller_supplied_tenant_is_overwritten_on_add() {
    let provider = provider(discriminator_features());
    let ambient = Arc::new(AmbientContext::with_tenant(TenantId::new("a")));
    let mut ctx = provider.context(&ambient, None).unwrap();
    ctx.add(
        "Product",
        EntityRecord::new("p1")
            .with("name", "X")
            .with(fields::TENANT_ID, "b"),
    )
    .unwrap();
    ctx.save_changes().unwrap();

    let b = Arc::new(AmbientContext::with_tenant(TenantId::new("b")));
    assert!(provider
        .context(&b, None)
        .unwrap()
        .query("Product")
        .unwrap()
        .is_empty());
    let row = ctx.find("Product", "p1").unwrap().unwrap();
    assert_eq!(row.get_str(fields::TENANT_ID), Some("a"));
}

#[test]
fn other_tenants_rows_cannot_be_updated_or_removed() {
    let provider = provider(discriminator_features());
    let a = Arc::new(AmbientContext::with_tenant(TenantId::new("a")));
    let mut ctx = provider.context(&a, None).unwrap();
    ctx.add("Product", EntityRecord::new("p1").with("name", "X"))
        .unwrap();
    ctx.save_changes().unwrap();

    let b = Arc::new(AmbientContext::with_tenant(TenantId::new("b")));
    let mut intruder = provider.context(&b, None).unwrap();
    assert!(matches!(
        intruder.update("Product", "p1", |row| {
            row.set("name", "pwned");
        }),
        Err(TenantryError::EntityNotFound { .. })
    ));
    assert!(matches!(
        intruder.remove("Product", "p1"),
        Err(TenantryError::EntityNotFound { .. })
    ));
}

#[test]
fn adding_a_key_owned_by_another_tenant_fails() {
    let provider = provider(discriminator_features());
    let a = Arc::new(AmbientContext::with_tenant(TenantId::new("a")));
    let mut owner = provider.context(&a, None).unwrap();
    owner
        .add("Product", EntityRecord::new("p1").with("name", "X"))
        .unwrap();
    owner.save_changes().unwrap();

    let b = Arc::new(AmbientContext::with_tenant(TenantId::new("b")));
    let mut intruder = provider.context(&b, None).unwrap();
    intruder
        .add("Product", EntityRecord::new("p1").with("name", "pwned"))
        .unwrap();
    let err = intruder.save_changes().unwrap_err();
    assert!(matches!(err, TenantryError::DuplicateKey { ref key, .. } if key == "p1"));
    assert_eq!(intruder.pending().len(), 1);
    assert!(intruder.query("Product").unwrap().is_empty());

    let row = owner.find("Product", "p1").unwrap().unwrap();
    assert_eq!(row.get_str("name"), Some("X"));
    assert_eq!(row.get_str(fields::TENANT_ID), Some("a"));
}

#[test]
fn updates_cannot_move_a_row_to_another_tenant() {
    let provider = provider(discriminator_features());
    let a = Arc::new(AmbientContext::with_tenant(TenantId::new("a")));
    let mut ctx = provider.context(&a, None).unwrap();
    ctx.add("Product", EntityRecord::new("p1").with("name", "X"))
        .unwrap();
    ctx.save_changes().unwrap();

    ctx.update("Product", "p1", |row| {
        row.set(fields::TENANT_ID, "b");
        row.set("name", "Y");
    })
    .unwrap();
    ctx.save_changes().unwrap();

    let b = Arc::new(AmbientContext::with_tenant(TenantId::new("b")));
    assert!(provider
        .context(&b, None)
        .unwrap()
        .query("Product")
        .unwrap()
        .is_empty());

    let row = ctx.find("Product", "p1").unwrap().unwrap();
    assert_eq!(row.get_str("name"), Some("Y"));
    assert_eq!(row.get_str(fields::TENANT_ID), Some("a"));
}

#[test]
fn database_strategy_distinguishes_unset_from_unconfigured() {
    let provider = provider(database_features());
    let ambient = Arc::new(AmbientContext::new());

    let unconfigured = provider
        .context(&ambient, Some(&TenantId::new("tenant3")))
        .unwrap_err();
    assert!(matches!(unconfigured, TenantryError::TenantNotConfigured { .. }));
    assert!(unconfigured.to_string().contains("tenant3"));

    let unset = provider.context(&ambient, None).unwrap_err();
    assert_eq!(unset.to_string(), "Current tenant ID is not set");
    assert_ne!(unconfigured.to_string(), unset.to_string());
}

#[test]
fn database_strategy_keeps_tenants_in_separate_stores() {
    let connector = Arc::new(MemoryConnector::new());
    let provider = ContextProvider::builder(Arc::new(database_features()), registry())
        .connector(Arc::clone(&connector) as Arc<dyn tenantry_store::StoreConnector>)
        .build()
        .unwrap();

    let ambient = Arc::new(AmbientContext::with_tenant(TenantId::new("tenant1")));
    let mut ctx = provider.context(&ambient, None).unwrap();
    ctx.add("Product", EntityRecord::new("p1").with("name", "X"))
        .unwrap();
    ctx.save_changes().unwrap();

    let other = provider
        .context(&ambient, Some(&TenantId::new("tenant2")))
        .unwrap();
    assert!(other.query("Product").unwrap().is_empty());
    assert_eq!(connector.database("tenant1").unwrap().len("Product"), 1);
    assert_eq!(connector.database("tenant2").unwrap().len("Product"), 0);
}

#[test]
fn database_strategy_builds_an_unfiltered_schema() {
    let provider = provider(database_features());
    let ambient = Arc::new(AmbientContext::new());
    let ctx = provider
        .context(&ambient, Some(&TenantId::new("tenant1")))
        .unwrap();
    let product = ctx.model().entity("Product").unwrap();
    assert!(product.filters().is_empty());
    assert!(product.field(fields::TENANT_ID).is_none());
}

// ---------------------------------------------------------------------------
// Auditing
// ---------------------------------------------------------------------------

fn audited_provider(
    policy: MissingUserPolicy,
    default_user: Option<&str>,
    clock: &Arc<ManualClock>,
) -> ContextProvider {
    let mut builder = FeatureSet::builder()
        .multi_tenant_by_discriminator(StoreConfig::in_memory("audited"))
        .auditing(policy);
    if let Some(user) = default_user {
        builder = builder.default_user(user);
    }
    ContextProvider::builder(Arc::new(builder.build().unwrap()), registry())
        .clock(Arc::clone(clock) as Arc<dyn ClockSource>)
        .build()
        .unwrap()
}

fn ambient(tenant: &str, user: Option<&str>) -> Arc<AmbientContext> {
    let ctx = AmbientContext::with_tenant(TenantId::new(tenant));
    if let Some(user) = user {
        ctx.set_user(UserId::new(user));
    }
    Arc::new(ctx)
}

fn int(row: &EntityRecord, field: &str) -> Option<i64> {
    row.get(field).and_then(Value::as_int)
}

#[test]
fn default_user_stamps_creator_and_later_editor() {
    let clock = Arc::new(ManualClock::new(1_000));
    let provider = audited_provider(MissingUserPolicy::UseDefaultUser, Some("SYSTEM"), &clock);

    let mut ctx = provider.context(&ambient("t", None), None).unwrap();
    ctx.add("Order", EntityRecord::new("o1")).unwrap();
    ctx.save_changes().unwrap();

    let row = ctx.find("Order", "o1").unwrap().unwrap();
    assert_eq!(row.get_str(fields::CREATED_BY), Some("SYSTEM"));
    assert_eq!(row.get_str(fields::MODIFIED_BY), Some("SYSTEM"));

    clock.advance(50);
    let mut ctx = provider.context(&ambient("t", Some("alice")), None).unwrap();
    ctx.update("Order", "o1", |row| {
        row.set("status", "shipped");
    })
    .unwrap();
    ctx.save_changes().unwrap();

    let row = ctx.find("Order", "o1").unwrap().unwrap();
    assert_eq!(row.get_str(fields::MODIFIED_BY), Some("alice"));
    assert_eq!(row.get_str(fields::CREATED_BY), Some("SYSTEM"));
    assert_eq!(int(&row, fields::LAST_MODIFIED_DATE), Some(1_050));
}

#[test]
fn skip_user_fields_keeps_caller_values() {
    let clock = Arc::new(ManualClock::new(0));
    let provider = audited_provider(MissingUserPolicy::SkipUserFields, None, &clock);

    let mut ctx = provider.context(&ambient("t", None), None).unwrap();
    ctx.add(
        "Order",
        EntityRecord::new("o1").with(fields::CREATED_BY, "OriginalUser"),
    )
    .unwrap();
    ctx.save_changes().unwrap();

    let row = ctx.find("Order", "o1").unwrap().unwrap();
    assert_eq!(row.get_str(fields::CREATED_BY), Some("OriginalUser"));
}

#[test]
fn reject_policy_blocks_the_whole_commit() {
    let clock = Arc::new(ManualClock::new(0));
    let provider = audited_provider(MissingUserPolicy::Reject, None, &clock);

    let mut ctx = provider.context(&ambient("t", None), None).unwrap();
    ctx.add("Product", EntityRecord::new("p1").with("name", "X"))
        .unwrap();
    ctx.add("Order", EntityRecord::new("o1")).unwrap();

    let err = ctx.save_changes().unwrap_err();
    assert!(err.to_string().contains("Current user ID is required"));
    assert!(err.to_string().contains("Reject"));
    assert_eq!(ctx.pending().len(), 2);
    assert!(ctx.query("Product").unwrap().is_empty());
}

#[test]
fn added_rows_have_equal_creation_and_modification_dates() {
    let clock = Arc::new(ManualClock::new(42));
    let provider = audited_provider(MissingUserPolicy::SaveAsNull, None, &clock);

    let mut ctx = provider.context(&ambient("t", None), None).unwrap();
    ctx.add("Order", EntityRecord::new("o1")).unwrap();
    ctx.save_changes().unwrap();

    let row = ctx.find("Order", "o1").unwrap().unwrap();
    assert_eq!(int(&row, fields::CREATED_DATE), Some(42));
    assert_eq!(int(&row, fields::CREATED_DATE), int(&row, fields::LAST_MODIFIED_DATE));
    assert_eq!(row.get(fields::CREATED_BY), Some(&Value::Null));
}

#[test]
fn modification_stamp_advances_within_one_clock_tick() {
    let clock = Arc::new(ManualClock::new(500));
    let provider = audited_provider(MissingUserPolicy::SaveAsNull, None, &clock);
    let mut ctx = provider.context(&ambient("t", Some("bob")), None).unwrap();
    ctx.add("Order", EntityRecord::new("o1")).unwrap();
    ctx.save_changes().unwrap();

    let mut previous = 500;
    for _ in 0..3 {
        ctx.update("Order", "o1", |row| {
            row.set(fields::CREATED_DATE, 0_i64);
        })
        .unwrap();
        ctx.save_changes().unwrap();

        let row = ctx.find("Order", "o1").unwrap().unwrap();
        let stamp = int(&row, fields::LAST_MODIFIED_DATE).unwrap();
        assert!(stamp > previous);
        assert_eq!(int(&row, fields::CREATED_DATE), Some(500));
        previous = stamp;
    }
}

// ---------------------------------------------------------------------------
// Schema build
// ---------------------------------------------------------------------------

#[test]
fn schema_build_is_idempotent() {
    let features = FeatureSet::builder()
        .multi_tenant_by_discriminator(StoreConfig::in_memory("s"))
        .auditing(MissingUserPolicy::Reject)
        .build()
        .unwrap();
    let pipeline = ProcessorPipeline::for_features(&features, Arc::new(ManualClock::new(0)));
    let registry = registry();

    let first = pipeline.build_model(&registry).unwrap();
    let second = pipeline.build_model(&registry).unwrap();
    assert_eq!(first, second);

    let order = first.entity("Order").unwrap();
    assert!(order.field(fields::CREATED_DATE).unwrap().required);
    assert!(order.field(fields::CREATED_BY).is_some());
    assert_eq!(order.filters().len(), 1);
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_operations_never_see_each_others_tenant() {
    let provider = Arc::new(provider(discriminator_features()));

    let tasks: Vec<_> = ["A", "B"]
        .into_iter()
        .map(|tenant| {
            let provider = Arc::clone(&provider);
            tokio::spawn(async move {
                for i in 0..25 {
                    let ambient = Arc::new(AmbientContext::with_tenant(TenantId::new(tenant)));
                    let mut ctx = provider.context(&ambient, None)?;
                    ctx.add(
                        "Product",
                        EntityRecord::new(format!("{tenant}-{i}")).with("name", tenant),
                    )?;
                    tokio::task::yield_now().await;
                    assert_eq!(ctx.current_tenant(), Some(TenantId::new(tenant)));
                    ctx.save_changes()?;
                    tokio::task::yield_now().await;

                    let rows = ctx.query("Product")?;
                    assert!(rows
                        .iter()
                        .all(|r| r.get_str(fields::TENANT_ID) == Some(tenant)));
                    assert_eq!(rows.len(), i + 1);
                }
                Ok::<_, TenantryError>(())
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap().unwrap();
    }
}

// ---------------------------------------------------------------------------
// Isolation property
// ---------------------------------------------------------------------------

fn tenant_pair() -> impl Strategy<Value = (String, String)> {
    (0..4_usize, 0..4_usize)
        .prop_filter("tenants must differ", |(a, b)| a != b)
        .prop_map(|(a, b)| (format!("t{a}"), format!("t{b}")))
}

fn all_tenants_database() -> FeatureSet {
    let mut builder = FeatureSet::builder().multi_tenant_by_database();
    for i in 0..4 {
        builder = builder.add_tenant(
            format!("t{i}").as_str(),
            StoreConfig::in_memory(format!("db{i}")),
        );
    }
    builder.build().unwrap()
}

fn write_then_read(
    provider: &ContextProvider,
    writer: &str,
    reader: &str,
    name: &str,
) -> Vec<EntityRecord> {
    let mut ctx = provider
        .context(&Arc::new(AmbientContext::with_tenant(TenantId::new(writer))), None)
        .unwrap();
    ctx.add("Product", EntityRecord::new("").with("name", name))
        .unwrap();
    ctx.save_changes().unwrap();

    provider
        .context(&Arc::new(AmbientContext::with_tenant(TenantId::new(reader))), None)
        .unwrap()
        .query("Product")
        .unwrap()
}

proptest! {
    #[test]
    fn isolation_holds_under_discriminator((a, b) in tenant_pair(), name in "[a-z]{1,12}") {
        let provider = provider(discriminator_features());
        let seen = write_then_read(&provider, &a, &b, &name);
        prop_assert!(seen.is_empty());
    }

    #[test]
    fn isolation_holds_under_database((a, b) in tenant_pair(), name in "[a-z]{1,12}") {
        let provider = provider(all_tenants_database());
        let seen = write_then_read(&provider, &a, &b, &name);
        prop_assert!(seen.is_empty());
    }
}
