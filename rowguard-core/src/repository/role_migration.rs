//! Storage side of the role-representation migration.
//!
//! Legacy rows carry their free-form role in `identities.legacy_role`; a
//! converted row has `legacy_role = NULL` and its ordered `role` set.
//!
//! `legacy_role` is a staging column. Moving a free-form `role` column into
//! it is a schema step (MySQL DDL commits implicitly, so it cannot share
//! the data transaction) and must run before this migration; a `role`
//! column that is still free-form text is reported as `Unexpected`.
//!
//! The planning reads are advisory. [`RoleMigrationStore::apply_role_conversions`]
//! locks the pending rows and refuses to apply a plan that no longer covers
//! exactly that set.

use crate::domain::{Role, StringUuid};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use sqlx::MySqlPool;

/// Shape of the identities table as seen by the migration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleSchemaState {
    /// Ordered column present and `n` rows still hold a legacy value
    LegacyPending(i64),
    /// Nothing left to convert
    Converted,
    /// Neither shape; the migration refuses to guess
    Unexpected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct LegacyRoleRow {
    pub id: StringUuid,
    pub legacy_role: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleConversion {
    pub id: StringUuid,
    /// Value the row must still hold for the conversion to apply
    pub legacy_role: String,
    pub role: Role,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoleMigrationStore: Send + Sync {
    async fn schema_state(&self) -> Result<RoleSchemaState>;
    async fn pending_legacy_roles(&self) -> Result<Vec<LegacyRoleRow>>;
    /// Apply every conversion in one transaction, or none of them.
    async fn apply_role_conversions(&self, conversions: &[RoleConversion]) -> Result<u64>;
}

pub struct RoleMigrationStoreImpl {
    pool: MySqlPool,
}

impl RoleMigrationStoreImpl {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

/// Whether the planned conversions target exactly the `pending` rows.
fn covers_exactly(conversions: &[RoleConversion], pending: &[StringUuid]) -> bool {
    let mut planned: Vec<StringUuid> = conversions.iter().map(|c| c.id).collect();
    let mut pending = pending.to_vec();
    planned.sort();
    pending.sort();
    planned == pending
}

#[async_trait]
impl RoleMigrationStore for RoleMigrationStoreImpl {
    async fn schema_state(&self) -> Result<RoleSchemaState> {
        let columns: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT CAST(COLUMN_NAME AS CHAR), CAST(DATA_TYPE AS CHAR)
            FROM information_schema.COLUMNS
            WHERE TABLE_SCHEMA = DATABASE()
              AND TABLE_NAME = 'identities'
              AND COLUMN_NAME IN ('role', 'legacy_role')
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let data_type = |name: &str| {
            columns
                .iter()
                .find(|(column, _)| column.eq_ignore_ascii_case(name))
                .map(|(_, ty)| ty.to_ascii_lowercase())
        };

        match (data_type("role").as_deref(), data_type("legacy_role")) {
            (Some("enum"), None) => Ok(RoleSchemaState::Converted),
            (Some("enum"), Some(_)) => {
                let row: (i64,) = sqlx::query_as(
                    "SELECT COUNT(*) FROM identities WHERE legacy_role IS NOT NULL",
                )
                .fetch_one(&self.pool)
                .await?;
                Ok(if row.0 == 0 {
                    RoleSchemaState::Converted
                } else {
                    RoleSchemaState::LegacyPending(row.0)
                })
            }
            (Some(other), _) => Ok(RoleSchemaState::Unexpected(format!(
                "identities.role has type {}",
                other
            ))),
            (None, _) => Ok(RoleSchemaState::Unexpected(
                "identities.role column is missing".to_string(),
            )),
        }
    }

    async fn pending_legacy_roles(&self) -> Result<Vec<LegacyRoleRow>> {
        let rows = sqlx::query_as::<_, LegacyRoleRow>(
            r#"
            SELECT id, legacy_role
            FROM identities
            WHERE legacy_role IS NOT NULL
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn apply_role_conversions(&self, conversions: &[RoleConversion]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let locked: Vec<(StringUuid,)> = sqlx::query_as(
            "SELECT id FROM identities WHERE legacy_role IS NOT NULL FOR UPDATE",
        )
        .fetch_all(&mut *tx)
        .await?;
        let locked: Vec<StringUuid> = locked.into_iter().map(|(id,)| id).collect();
        if !covers_exactly(conversions, &locked) {
            tx.rollback().await?;
            return Err(AppError::MigrationStateConflict(format!(
                "{} legacy rows pending, plan covers {}",
                locked.len(),
                conversions.len()
            )));
        }

        let mut applied = 0;

        for conversion in conversions {
            let result = sqlx::query(
                r#"
                UPDATE identities
                SET role = ?, legacy_role = NULL, updated_at = NOW()
                WHERE id = ? AND legacy_role = ?
                "#,
            )
            .bind(conversion.role)
            .bind(conversion.id)
            .bind(&conversion.legacy_role)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() != 1 {
                tx.rollback().await?;
                return Err(AppError::MigrationStateConflict(format!(
                    "identity {} changed while the role migration was running",
                    conversion.id
                )));
            }
            applied += 1;
        }

        tx.commit().await?;
        Ok(applied)
    }
}
