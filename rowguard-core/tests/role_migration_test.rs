//! Role-representation migration against MySQL

use rowguard_core::context::ServiceGrant;
use rowguard_core::domain::{PrincipalId, Role, StringUuid};
use rowguard_core::error::AppError;
use rowguard_core::migration::{RoleMigrationOutcome, RoleMigrator};
use rowguard_core::repository::identity::IdentityRepositoryImpl;
use rowguard_core::repository::role_migration::{
    RoleConversion, RoleMigrationStore, RoleMigrationStoreImpl,
};
use rowguard_core::repository::IdentityRepository;
use sqlx::MySqlPool;
use std::sync::Arc;

mod common;

async fn insert_legacy(pool: &MySqlPool, principal: &str, legacy: &str) -> StringUuid {
    let id = StringUuid::new_v4();
    sqlx::query(
        "INSERT INTO identities (id, principal_id, role, legacy_role, email, created_at, updated_at) \
         VALUES (?, ?, 'citizen', ?, ?, NOW(), NOW())",
    )
    .bind(id)
    .bind(principal)
    .bind(legacy)
    .bind(format!("{}@example.org", principal))
    .execute(pool)
    .await
    .unwrap();
    id
}

#[tokio::test]
async fn test_legacy_roles_convert_once() {
    let pool = match common::get_test_pool().await {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("Skipping test: could not connect to database: {}", e);
            return;
        }
    };

    for (principal, legacy) in [
        ("kc-root", "SUPER_ADMIN"),
        ("kc-ops", "operator"),
        ("kc-odd", "legacy-superuser"),
    ] {
        insert_legacy(&pool, principal, legacy).await;
    }

    let migrator = RoleMigrator::new(Arc::new(RoleMigrationStoreImpl::new(pool.clone())));
    let grant = ServiceGrant::issue("test");
    assert_eq!(
        migrator.run(&grant).await.unwrap(),
        RoleMigrationOutcome::Applied { rows: 3 }
    );
    assert_eq!(
        migrator.run(&grant).await.unwrap(),
        RoleMigrationOutcome::AlreadyApplied
    );

    let identities = IdentityRepositoryImpl::new(pool.clone());
    let role_of = |principal: &'static str| {
        let identities = &identities;
        async move {
            identities
                .find_by_principal(&PrincipalId::new(principal).unwrap())
                .await
                .unwrap()
                .unwrap()
                .role
        }
    };
    assert_eq!(role_of("kc-root").await, Role::SuperAdmin);
    assert_eq!(role_of("kc-ops").await, Role::Operator);
    assert_eq!(role_of("kc-odd").await, Role::Citizen);
}

#[tokio::test]
async fn test_stale_plan_is_rejected_without_partial_writes() {
    let pool = match common::get_test_pool().await {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("Skipping test: could not connect to database: {}", e);
            return;
        }
    };

    let planned = insert_legacy(&pool, "kc-planned", "operator").await;
    let store = RoleMigrationStoreImpl::new(pool.clone());
    let plan = vec![RoleConversion {
        id: planned,
        legacy_role: "operator".to_string(),
        role: Role::Operator,
    }];

    // Imported between planning and applying.
    insert_legacy(&pool, "kc-late", "SUPER_ADMIN").await;

    assert!(matches!(
        store.apply_role_conversions(&plan).await,
        Err(AppError::MigrationStateConflict(_))
    ));
    assert_eq!(store.pending_legacy_roles().await.unwrap().len(), 2);

    let migrator = RoleMigrator::new(Arc::new(store));
    assert_eq!(
        migrator.run(&ServiceGrant::issue("test")).await.unwrap(),
        RoleMigrationOutcome::Applied { rows: 2 }
    );
}
