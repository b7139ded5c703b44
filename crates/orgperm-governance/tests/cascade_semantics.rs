//! Integration tests for effective access resolution and cascading writes.

mod common;

use std::collections::BTreeMap;

use orgperm_core::{DepartmentId, ModuleAccessLevel, SubGroupId, UserId};
use orgperm_governance::audit::AuditFilter;
use orgperm_governance::{
    AuditAction, CascadeScope, CascadeTarget, GovernanceError, IdentitySource, PermissionChange,
};

use common::{directives, record, sales_fixture, TestContext};

fn sales() -> DepartmentId {
    DepartmentId::from_name("Sales")
}

fn west() -> CascadeTarget {
    CascadeTarget::SubGroup {
        department: sales(),
        sub_group: SubGroupId::from_name("West"),
    }
}

async fn write(ctx: &TestContext, target: CascadeTarget, pairs: &[(&str, &str)]) {
    ctx.engine
        .apply_permission_change(
            PermissionChange {
                target,
                module_access: directives(pairs),
            },
            ctx.actor_id,
        )
        .await
        .expect("Failed to apply permission change");
}

// ============================================================================
// Resolution
// ============================================================================

#[tokio::test]
async fn test_users_inherit_department_value() {
    let ctx = TestContext::with_records(sales_fixture()).await;
    write(&ctx, CascadeTarget::Department(sales()), &[("hr", "access")]).await;

    for email in ["alice@x.com", "bob@x.com", "carol@x.com", "dave@x.com"] {
        assert_eq!(ctx.access(email, "hr").await, ModuleAccessLevel::Access);
        assert_eq!(ctx.access(email, "chat").await, ModuleAccessLevel::None);
    }
}

#[tokio::test]
async fn test_department_without_record_resolves_to_none() {
    let ctx = TestContext::with_records(sales_fixture()).await;
    assert_eq!(ctx.access("erin@x.com", "tickets").await, ModuleAccessLevel::None);
}

#[tokio::test]
async fn test_unknown_user_is_record_not_found() {
    let ctx = TestContext::with_records(sales_fixture()).await;
    let result = ctx
        .engine
        .effective_access(
            &UserId::from_email("ghost@x.com"),
            &orgperm_core::ModuleKey::new("hr"),
        )
        .await;
    assert!(matches!(result, Err(GovernanceError::RecordNotFound { .. })));
}

#[tokio::test]
async fn test_override_precedence_and_inherit_reverts() {
    let ctx = TestContext::with_records(sales_fixture()).await;
    write(&ctx, CascadeTarget::Department(sales()), &[("hr", "none")]).await;
    write(&ctx, west(), &[("hr", "access")]).await;

    let alice = CascadeTarget::User(UserId::from_email("alice@x.com"));
    write(&ctx, alice.clone(), &[("hr", "admin")]).await;
    assert_eq!(ctx.access("alice@x.com", "hr").await, ModuleAccessLevel::Admin);
    assert!(ctx
        .engine
        .has_admin_access(&UserId::from_email("alice@x.com"), &orgperm_core::ModuleKey::new("hr"))
        .await
        .unwrap());

    write(&ctx, alice, &[("hr", "inherit")]).await;
    assert_eq!(ctx.access("alice@x.com", "hr").await, ModuleAccessLevel::Access);

    let record = ctx.engine.permission_record(&sales()).await.unwrap().unwrap();
    let west_entry = &record.sub_groups[&SubGroupId::from_name("West")];
    assert!(west_entry.user_overrides.is_empty());
}

#[tokio::test]
async fn test_effective_access_map_covers_catalogue() {
    let ctx = TestContext::with_records(sales_fixture()).await;
    write(&ctx, CascadeTarget::Department(sales()), &[("tickets", "admin")]).await;

    let map = ctx
        .engine
        .effective_access_map(&UserId::from_email("dave@x.com"))
        .await
        .unwrap();
    assert_eq!(map.len(), ctx.engine.catalogue().modules().len());
    assert_eq!(map[&orgperm_core::ModuleKey::new("tickets")], ModuleAccessLevel::Admin);
}

// ============================================================================
// Destructive cascade
// ============================================================================

/// Department "Sales" has hr:none, West has no entry, Alice overrides
/// hr:admin. A department write of hr:access clears Alice's override.
#[tokio::test]
async fn test_department_cascade_clears_user_override() {
    let ctx = TestContext::with_records(sales_fixture()).await;
    write(&ctx, CascadeTarget::Department(sales()), &[("hr", "none")]).await;
    write(
        &ctx,
        CascadeTarget::User(UserId::from_email("alice@x.com")),
        &[("hr", "admin")],
    )
    .await;
    assert_eq!(ctx.access("alice@x.com", "hr").await, ModuleAccessLevel::Admin);

    let result = ctx
        .engine
        .apply_permission_change(
            PermissionChange {
                target: CascadeTarget::Department(sales()),
                module_access: directives(&[("hr", "access")]),
            },
            ctx.actor_id,
        )
        .await
        .unwrap();

    assert_eq!(result.mode, CascadeScope::Department);
    assert_eq!(result.affected_sub_group_count, 1);
    assert_eq!(result.affected_user_override_count, 1);
    assert_eq!(ctx.access("alice@x.com", "hr").await, ModuleAccessLevel::Access);
}

#[tokio::test]
async fn test_department_cascade_overrides_every_subtree_value() {
    let ctx = TestContext::with_records(sales_fixture()).await;
    write(&ctx, west(), &[("chat", "admin")]).await;
    write(
        &ctx,
        CascadeTarget::SubGroup {
            department: sales(),
            sub_group: SubGroupId::from_name("East"),
        },
        &[("chat", "none")],
    )
    .await;
    write(
        &ctx,
        CascadeTarget::User(UserId::from_email("dave@x.com")),
        &[("chat", "admin")],
    )
    .await;
    write(
        &ctx,
        CascadeTarget::User(UserId::from_email("carol@x.com")),
        &[("chat", "access")],
    )
    .await;

    let result = ctx
        .engine
        .apply_permission_change(
            PermissionChange {
                target: CascadeTarget::Department(sales()),
                module_access: directives(&[("chat", "access")]),
            },
            ctx.actor_id,
        )
        .await
        .unwrap();

    assert_eq!(result.affected_sub_group_count, 2);
    assert_eq!(result.affected_user_override_count, 2);
    for email in ["alice@x.com", "bob@x.com", "carol@x.com", "dave@x.com"] {
        assert_eq!(ctx.access(email, "chat").await, ModuleAccessLevel::Access);
    }

    let record = ctx.engine.permission_record(&sales()).await.unwrap().unwrap();
    assert_eq!(record.user_override_count(), 0);
    assert!(record.sub_groups.values().all(|s| s.is_empty()));
}

#[tokio::test]
async fn test_sub_group_cascade_is_isolated() {
    let ctx = TestContext::with_records(sales_fixture()).await;
    write(&ctx, CascadeTarget::Department(sales()), &[("hr", "access")]).await;
    write(
        &ctx,
        CascadeTarget::User(UserId::from_email("carol@x.com")),
        &[("hr", "admin")],
    )
    .await;
    write(
        &ctx,
        CascadeTarget::User(UserId::from_email("bob@x.com")),
        &[("hr", "admin")],
    )
    .await;

    let result = ctx
        .engine
        .apply_permission_change(
            PermissionChange {
                target: west(),
                module_access: directives(&[("hr", "none")]),
            },
            ctx.actor_id,
        )
        .await
        .unwrap();

    assert_eq!(result.mode, CascadeScope::Subgroup);
    assert_eq!(result.affected_sub_group_count, 1);
    assert_eq!(result.affected_user_override_count, 1);

    // West users lose their overrides and take the sub-group value.
    assert_eq!(ctx.access("alice@x.com", "hr").await, ModuleAccessLevel::None);
    assert_eq!(ctx.access("bob@x.com", "hr").await, ModuleAccessLevel::None);
    // Siblings and direct users are untouched.
    assert_eq!(ctx.access("carol@x.com", "hr").await, ModuleAccessLevel::Admin);
    assert_eq!(ctx.access("dave@x.com", "hr").await, ModuleAccessLevel::Access);
}

#[tokio::test]
async fn test_auto_initialize_after_cascade_does_not_resurrect_defaults() {
    let ctx = TestContext::with_records(sales_fixture()).await;
    ctx.engine.auto_initialize(ctx.actor_id).await.unwrap();
    assert_eq!(ctx.access("alice@x.com", "documents").await, ModuleAccessLevel::Access);

    write(&ctx, CascadeTarget::Department(sales()), &[("documents", "none")]).await;
    let second = ctx.engine.auto_initialize(ctx.actor_id).await.unwrap();

    assert_eq!(second.initialized_sub_groups, 0);
    assert_eq!(ctx.access("alice@x.com", "documents").await, ModuleAccessLevel::None);
}

#[tokio::test]
async fn test_no_op_user_write_leaves_store_untouched() {
    let ctx = TestContext::with_records(sales_fixture()).await;

    let result = ctx
        .engine
        .apply_permission_change(
            PermissionChange {
                target: CascadeTarget::User(UserId::from_email("alice@x.com")),
                module_access: directives(&[("hr", "inherit")]),
            },
            ctx.actor_id,
        )
        .await
        .unwrap();
    assert_eq!(result.affected_user_override_count, 0);
    assert!(ctx.engine.permissions_all().await.unwrap().is_empty());

    // Still audited as a successful write.
    let entries = ctx.stores.audit.all().await;
    assert_eq!(entries.len(), 1);
    assert!(entries[0].success);

    let init = ctx.engine.auto_initialize(ctx.actor_id).await.unwrap();
    assert_eq!(init.initialized_departments, 2);
    assert_eq!(init.initialized_sub_groups, 2);
    assert_eq!(ctx.access("dave@x.com", "dashboard").await, ModuleAccessLevel::Access);
    assert_eq!(ctx.access("alice@x.com", "documents").await, ModuleAccessLevel::Access);
}

#[tokio::test]
async fn test_user_override_does_not_block_defaults() {
    let ctx = TestContext::with_records(sales_fixture()).await;
    write(
        &ctx,
        CascadeTarget::User(UserId::from_email("alice@x.com")),
        &[("hr", "admin")],
    )
    .await;
    write(
        &ctx,
        CascadeTarget::User(UserId::from_email("dave@x.com")),
        &[("chat", "admin")],
    )
    .await;
    let before = ctx.engine.permission_record(&sales()).await.unwrap().unwrap();
    assert!(!before.initialized);

    let init = ctx.engine.auto_initialize(ctx.actor_id).await.unwrap();
    assert_eq!(init.initialized_departments, 2);
    assert_eq!(init.initialized_sub_groups, 2);
    assert_eq!(init.total_permission_entries, 2 * 7 + 2);

    // Defaults land around the overrides, which survive.
    assert_eq!(ctx.access("alice@x.com", "hr").await, ModuleAccessLevel::Admin);
    assert_eq!(ctx.access("alice@x.com", "documents").await, ModuleAccessLevel::Access);
    assert_eq!(ctx.access("bob@x.com", "documents").await, ModuleAccessLevel::Access);
    assert_eq!(ctx.access("dave@x.com", "chat").await, ModuleAccessLevel::Admin);
    assert_eq!(ctx.access("dave@x.com", "dashboard").await, ModuleAccessLevel::Access);

    let again = ctx.engine.auto_initialize(ctx.actor_id).await.unwrap();
    assert!(again.is_empty());
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_unknown_targets_fail_and_are_audited() {
    let ctx = TestContext::with_records(sales_fixture()).await;

    let targets = [
        CascadeTarget::Department(DepartmentId::from_name("Marketing")),
        CascadeTarget::SubGroup {
            department: sales(),
            sub_group: SubGroupId::from_name("North"),
        },
        CascadeTarget::User(UserId::from_email("ghost@x.com")),
    ];
    for target in targets {
        let result = ctx
            .engine
            .apply_permission_change(
                PermissionChange {
                    target,
                    module_access: directives(&[("hr", "admin")]),
                },
                ctx.actor_id,
            )
            .await;
        assert!(matches!(result, Err(GovernanceError::RecordNotFound { .. })));
    }

    assert!(ctx.engine.permissions_all().await.unwrap().is_empty());
    let failed = ctx
        .engine
        .audit_log(AuditFilter {
            success: Some(false),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(failed.len(), 3);
}

#[tokio::test]
async fn test_unknown_module_rejected_without_change() {
    let ctx = TestContext::with_records(sales_fixture()).await;
    write(&ctx, CascadeTarget::Department(sales()), &[("hr", "access")]).await;
    let before = ctx.engine.permission_record(&sales()).await.unwrap();

    let result = ctx
        .engine
        .apply_permission_change(
            PermissionChange {
                target: CascadeTarget::Department(sales()),
                module_access: directives(&[("payroll", "admin")]),
            },
            ctx.actor_id,
        )
        .await;

    assert!(matches!(result, Err(GovernanceError::Validation { .. })));
    assert_eq!(ctx.engine.permission_record(&sales()).await.unwrap(), before);
}

#[tokio::test]
async fn test_each_write_appends_one_audit_entry() {
    let ctx = TestContext::with_records(sales_fixture()).await;
    write(&ctx, CascadeTarget::Department(sales()), &[("hr", "access")]).await;
    write(&ctx, west(), &[("hr", "none")]).await;
    write(
        &ctx,
        CascadeTarget::User(UserId::from_email("alice@x.com")),
        &[("hr", "admin")],
    )
    .await;

    let entries = ctx.stores.audit.all().await;
    let actions: Vec<_> = entries.iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![
            AuditAction::DepartmentCascade,
            AuditAction::SubGroupCascade,
            AuditAction::UserOverride,
        ]
    );
    assert_eq!(entries[0].affected_user_count, 4);
    assert_eq!(entries[1].target_id, "sales/west");
    assert_eq!(entries[1].affected_user_count, 2);
    assert!(entries.iter().all(|e| e.success && e.actor_id == ctx.actor_id));
}

#[tokio::test]
async fn test_batch_user_overrides_all_or_nothing() {
    let ctx = TestContext::with_records(sales_fixture()).await;

    // erin is in Finance, so the whole batch is rejected.
    let overrides = BTreeMap::from([
        (UserId::from_email("alice@x.com"), directives(&[("hr", "admin")])),
        (UserId::from_email("erin@x.com"), directives(&[("hr", "admin")])),
    ]);
    let result = ctx
        .engine
        .apply_user_overrides(sales(), overrides, ctx.actor_id)
        .await;
    assert!(matches!(result, Err(GovernanceError::RecordNotFound { .. })));
    assert_eq!(ctx.access("alice@x.com", "hr").await, ModuleAccessLevel::None);

    let overrides = BTreeMap::from([
        (UserId::from_email("alice@x.com"), directives(&[("hr", "admin")])),
        (UserId::from_email("dave@x.com"), directives(&[("hr", "access")])),
    ]);
    let result = ctx
        .engine
        .apply_user_overrides(sales(), overrides, ctx.actor_id)
        .await
        .unwrap();
    assert_eq!(result.affected_user_override_count, 2);
    assert_eq!(ctx.access("alice@x.com", "hr").await, ModuleAccessLevel::Admin);
    assert_eq!(ctx.access("dave@x.com", "hr").await, ModuleAccessLevel::Access);
}

#[tokio::test]
async fn test_override_follows_user_after_catalogue_move() {
    let ctx = TestContext::with_records(sales_fixture()).await;
    write(
        &ctx,
        CascadeTarget::User(UserId::from_email("dave@x.com")),
        &[("hr", "admin")],
    )
    .await;

    // Dave moves into West; his department-level override no longer applies.
    ctx.engine
        .upsert_identity(record(IdentitySource::Manual, "dave@x.com", "Sales|West"))
        .await
        .unwrap();
    assert_eq!(ctx.access("dave@x.com", "hr").await, ModuleAccessLevel::None);
}
