//! Identity repository

use super::{mysql_error_number, ER_DUP_ENTRY, ER_NO_REFERENCED_ROW, ER_ROW_IS_REFERENCED};
use crate::context::IdentityContext;
use crate::domain::{
    CreateIdentityInput, Identity, OwnerRef, PrincipalId, Role, StringUuid, UpdateProfileInput,
};
use crate::error::{AppError, Result};
use crate::policy::{FilterColumns, RowFilter};
use async_trait::async_trait;
use sqlx::{MySql, MySqlPool, QueryBuilder};

const IDENTITY_COLUMNS: &str = "i.id, i.principal_id, i.org_id, i.role, i.email, \
     i.display_name, i.phone, i.locale, i.created_at, i.updated_at";

pub(crate) const IDENTITY_FILTER_COLUMNS: FilterColumns = FilterColumns {
    owner: Some("i.id"),
    owner_org: "i.org_id",
};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityRepository: Send + Sync {
    /// Privileged: principal → identity triple, bypassing row filters.
    async fn resolve_principal(&self, principal: &PrincipalId) -> Result<Option<IdentityContext>>;
    /// Privileged: identity id → owner reference, bypassing row filters.
    async fn membership_of(&self, id: StringUuid) -> Result<Option<OwnerRef>>;
    /// Privileged: full row for a principal, used by provisioning.
    async fn find_by_principal(&self, principal: &PrincipalId) -> Result<Option<Identity>>;

    async fn find_by_id(&self, id: StringUuid, filter: &RowFilter) -> Result<Option<Identity>>;
    async fn list(&self, filter: &RowFilter, offset: i64, limit: i64) -> Result<Vec<Identity>>;
    async fn count(&self, filter: &RowFilter) -> Result<i64>;

    /// Fails with `ProvisioningConflict` when the principal already has a row.
    async fn create(&self, input: &CreateIdentityInput) -> Result<Identity>;

    // Writes carry the compiled write rule as `guard` and touch only a row
    // that still satisfies it. `None`/`false` means no row did.
    async fn update_profile(
        &self,
        id: StringUuid,
        input: &UpdateProfileInput,
        guard: &RowFilter,
    ) -> Result<Option<Identity>>;
    /// Also requires the row to still hold `expected_role`.
    async fn reassign(
        &self,
        id: StringUuid,
        expected_role: Role,
        role: Role,
        org_id: Option<StringUuid>,
        guard: &RowFilter,
    ) -> Result<Option<Identity>>;
    /// Fails with `OwnerConstraintViolation` while protected rows reference it.
    async fn delete(&self, id: StringUuid, guard: &RowFilter) -> Result<bool>;
}

/// ` WHERE i.id = ? AND <guard>`
fn push_guard(qb: &mut QueryBuilder<'_, MySql>, id: StringUuid, guard: &RowFilter) {
    qb.push(" WHERE i.id = ").push_bind(id).push(" AND ");
    guard.push_sql(qb, &IDENTITY_FILTER_COLUMNS);
}

fn profile_update(
    id: StringUuid,
    input: &UpdateProfileInput,
    guard: &RowFilter,
) -> QueryBuilder<'static, MySql> {
    let mut qb = QueryBuilder::new("UPDATE identities i SET i.display_name = COALESCE(");
    qb.push_bind(input.display_name.clone())
        .push(", i.display_name), i.phone = COALESCE(")
        .push_bind(input.phone.clone())
        .push(", i.phone), i.locale = COALESCE(")
        .push_bind(input.locale.clone())
        .push(", i.locale), i.updated_at = NOW()");
    push_guard(&mut qb, id, guard);
    qb
}

fn reassignment(
    id: StringUuid,
    expected_role: Role,
    role: Role,
    org_id: Option<StringUuid>,
    guard: &RowFilter,
) -> QueryBuilder<'static, MySql> {
    let mut qb = QueryBuilder::new("UPDATE identities i SET i.role = ");
    qb.push_bind(role)
        .push(", i.org_id = ")
        .push_bind(org_id)
        .push(", i.updated_at = NOW()");
    push_guard(&mut qb, id, guard);
    qb.push(" AND i.role = ").push_bind(expected_role);
    qb
}

pub struct IdentityRepositoryImpl {
    pool: MySqlPool,
}

impl IdentityRepositoryImpl {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, id: StringUuid) -> Result<Option<Identity>> {
        self.find_by_id(id, &RowFilter::AllowAll).await
    }
}

#[async_trait]
impl IdentityRepository for IdentityRepositoryImpl {
    async fn resolve_principal(&self, principal: &PrincipalId) -> Result<Option<IdentityContext>> {
        let row: Option<(StringUuid, Option<StringUuid>, Role)> = sqlx::query_as(
            r#"
            SELECT id, org_id, role
            FROM identities
            WHERE principal_id = ?
            "#,
        )
        .bind(principal.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(identity_id, org_id, role)| IdentityContext {
            identity_id,
            org_id,
            role,
        }))
    }

    async fn membership_of(&self, id: StringUuid) -> Result<Option<OwnerRef>> {
        let owner = sqlx::query_as::<_, OwnerRef>("SELECT id, org_id FROM identities WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(owner)
    }

    async fn find_by_principal(&self, principal: &PrincipalId) -> Result<Option<Identity>> {
        let identity = sqlx::query_as::<_, Identity>(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM identities i WHERE i.principal_id = ?"
        ))
        .bind(principal.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(identity)
    }

    async fn find_by_id(&self, id: StringUuid, filter: &RowFilter) -> Result<Option<Identity>> {
        if filter.is_deny_all() {
            return Ok(None);
        }

        let mut qb = QueryBuilder::<MySql>::new(format!(
            "SELECT {IDENTITY_COLUMNS} FROM identities i WHERE i.id = "
        ));
        qb.push_bind(id).push(" AND ");
        filter.push_sql(&mut qb, &IDENTITY_FILTER_COLUMNS);

        let identity = qb
            .build_query_as::<Identity>()
            .fetch_optional(&self.pool)
            .await?;

        Ok(identity)
    }

    async fn list(&self, filter: &RowFilter, offset: i64, limit: i64) -> Result<Vec<Identity>> {
        if filter.is_deny_all() {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<MySql>::new(format!(
            "SELECT {IDENTITY_COLUMNS} FROM identities i WHERE "
        ));
        filter.push_sql(&mut qb, &IDENTITY_FILTER_COLUMNS);
        qb.push(" ORDER BY i.created_at DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let identities = qb
            .build_query_as::<Identity>()
            .fetch_all(&self.pool)
            .await?;

        Ok(identities)
    }

    async fn count(&self, filter: &RowFilter) -> Result<i64> {
        if filter.is_deny_all() {
            return Ok(0);
        }

        let mut qb = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM identities i WHERE ");
        filter.push_sql(&mut qb, &IDENTITY_FILTER_COLUMNS);

        let row: (i64,) = qb.build_query_as().fetch_one(&self.pool).await?;
        Ok(row.0)
    }

    async fn create(&self, input: &CreateIdentityInput) -> Result<Identity> {
        let id = StringUuid::new_v4();

        let result = sqlx::query(
            r#"
            INSERT INTO identities (id, principal_id, org_id, role, email, display_name, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, NOW(), NOW())
            "#,
        )
        .bind(id)
        .bind(&input.principal_id)
        .bind(input.org_id)
        .bind(input.role)
        .bind(&input.email)
        .bind(&input.display_name)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {}
            Err(e) if mysql_error_number(&e) == Some(ER_DUP_ENTRY) => {
                return Err(AppError::ProvisioningConflict)
            }
            Err(e) if mysql_error_number(&e) == Some(ER_NO_REFERENCED_ROW) => {
                return Err(AppError::BadRequest("Organization does not exist".to_string()))
            }
            Err(e) => return Err(e.into()),
        }

        self.fetch(id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to create identity")))
    }

    async fn update_profile(
        &self,
        id: StringUuid,
        input: &UpdateProfileInput,
        guard: &RowFilter,
    ) -> Result<Option<Identity>> {
        if guard.is_deny_all() {
            return Ok(None);
        }

        let result = profile_update(id, input, guard)
            .build()
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.fetch(id).await
    }

    async fn reassign(
        &self,
        id: StringUuid,
        expected_role: Role,
        role: Role,
        org_id: Option<StringUuid>,
        guard: &RowFilter,
    ) -> Result<Option<Identity>> {
        if guard.is_deny_all() {
            return Ok(None);
        }

        let result = reassignment(id, expected_role, role, org_id, guard)
            .build()
            .execute(&self.pool)
            .await;

        let result = match result {
            Ok(result) => result,
            Err(e) if mysql_error_number(&e) == Some(ER_NO_REFERENCED_ROW) => {
                return Err(AppError::BadRequest("Organization does not exist".to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.fetch(id).await
    }

    async fn delete(&self, id: StringUuid, guard: &RowFilter) -> Result<bool> {
        if guard.is_deny_all() {
            return Ok(false);
        }

        let mut qb = QueryBuilder::<MySql>::new("DELETE i FROM identities i");
        push_guard(&mut qb, id, guard);
        let result = qb.build().execute(&self.pool).await;

        match result {
            Ok(result) => Ok(result.rows_affected() > 0),
            Err(e) if mysql_error_number(&e) == Some(ER_ROW_IS_REFERENCED) => {
                Err(AppError::OwnerConstraintViolation)
            }
            Err(e) => Err(e.into()),
        }
    }
}
