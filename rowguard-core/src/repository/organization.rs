//! Organization repository

use super::{mysql_error_number, ER_DUP_ENTRY};
use crate::domain::{
    normalize_domain, CreateOrganizationInput, Organization, StringUuid, UpdateOrganizationInput,
};
use crate::error::{AppError, Result};
use crate::policy::{FilterColumns, RowFilter};
use async_trait::async_trait;
use sqlx::{MySql, MySqlPool, QueryBuilder};

const ORGANIZATION_COLUMNS: &str =
    "id, name, registration_id, domain, status, created_at, updated_at";

const ORGANIZATION_FILTER_COLUMNS: FilterColumns = FilterColumns {
    owner: None,
    owner_org: "id",
};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrganizationRepository: Send + Sync {
    async fn find_by_id(&self, id: StringUuid, filter: &RowFilter)
        -> Result<Option<Organization>>;
    /// Privileged: exact (normalized) domain match for provisioning.
    async fn find_by_domain(&self, domain: &str) -> Result<Option<Organization>>;
    async fn list(&self, filter: &RowFilter, offset: i64, limit: i64)
        -> Result<Vec<Organization>>;
    async fn count(&self, filter: &RowFilter) -> Result<i64>;
    /// Fails with `Conflict` if the domain or registration id is taken.
    async fn create(&self, input: &CreateOrganizationInput) -> Result<Organization>;
    async fn update(&self, id: StringUuid, input: &UpdateOrganizationInput)
        -> Result<Organization>;
    /// Member identities become unaffiliated (`ON DELETE SET NULL`).
    async fn delete(&self, id: StringUuid) -> Result<()>;
}

pub struct OrganizationRepositoryImpl {
    pool: MySqlPool,
}

impl OrganizationRepositoryImpl {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

fn map_unique_violation(e: sqlx::Error) -> AppError {
    if mysql_error_number(&e) == Some(ER_DUP_ENTRY) {
        AppError::Conflict("Organization domain or registration id already in use".to_string())
    } else {
        e.into()
    }
}

#[async_trait]
impl OrganizationRepository for OrganizationRepositoryImpl {
    async fn find_by_id(
        &self,
        id: StringUuid,
        filter: &RowFilter,
    ) -> Result<Option<Organization>> {
        if filter.is_deny_all() {
            return Ok(None);
        }

        let mut qb = QueryBuilder::<MySql>::new(format!(
            "SELECT {ORGANIZATION_COLUMNS} FROM organizations WHERE id = "
        ));
        qb.push_bind(id).push(" AND ");
        filter.push_sql(&mut qb, &ORGANIZATION_FILTER_COLUMNS);

        let org = qb
            .build_query_as::<Organization>()
            .fetch_optional(&self.pool)
            .await?;

        Ok(org)
    }

    async fn find_by_domain(&self, domain: &str) -> Result<Option<Organization>> {
        let org = sqlx::query_as::<_, Organization>(&format!(
            "SELECT {ORGANIZATION_COLUMNS} FROM organizations WHERE domain = ?"
        ))
        .bind(normalize_domain(domain))
        .fetch_optional(&self.pool)
        .await?;

        Ok(org)
    }

    async fn list(
        &self,
        filter: &RowFilter,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Organization>> {
        if filter.is_deny_all() {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<MySql>::new(format!(
            "SELECT {ORGANIZATION_COLUMNS} FROM organizations WHERE "
        ));
        filter.push_sql(&mut qb, &ORGANIZATION_FILTER_COLUMNS);
        qb.push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let orgs = qb
            .build_query_as::<Organization>()
            .fetch_all(&self.pool)
            .await?;

        Ok(orgs)
    }

    async fn count(&self, filter: &RowFilter) -> Result<i64> {
        if filter.is_deny_all() {
            return Ok(0);
        }

        let mut qb = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM organizations WHERE ");
        filter.push_sql(&mut qb, &ORGANIZATION_FILTER_COLUMNS);

        let row: (i64,) = qb.build_query_as().fetch_one(&self.pool).await?;
        Ok(row.0)
    }

    async fn create(&self, input: &CreateOrganizationInput) -> Result<Organization> {
        let id = StringUuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO organizations (id, name, registration_id, domain, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, 'active', NOW(), NOW())
            "#,
        )
        .bind(id)
        .bind(&input.name)
        .bind(&input.registration_id)
        .bind(input.domain.as_deref().map(normalize_domain))
        .execute(&self.pool)
        .await
        .map_err(map_unique_violation)?;

        self.find_by_id(id, &RowFilter::AllowAll)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to create organization")))
    }

    async fn update(
        &self,
        id: StringUuid,
        input: &UpdateOrganizationInput,
    ) -> Result<Organization> {
        let existing = self
            .find_by_id(id, &RowFilter::AllowAll)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Organization {} not found", id)))?;

        let name = input.name.as_ref().unwrap_or(&existing.name);
        let registration_id = input
            .registration_id
            .as_ref()
            .or(existing.registration_id.as_ref());
        let domain = input
            .domain
            .as_deref()
            .map(normalize_domain)
            .or(existing.domain.clone());
        let status = input.status.unwrap_or(existing.status);

        sqlx::query(
            r#"
            UPDATE organizations
            SET name = ?, registration_id = ?, domain = ?, status = ?, updated_at = NOW()
            WHERE id = ?
            "#,
        )
        .bind(name)
        .bind(registration_id)
        .bind(domain)
        .bind(status)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_unique_violation)?;

        self.find_by_id(id, &RowFilter::AllowAll)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to update organization")))
    }

    async fn delete(&self, id: StringUuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM organizations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Organization {} not found", id)));
        }

        Ok(())
    }
}
