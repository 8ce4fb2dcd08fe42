//! Protected resource repository
//!
//! One table per [`ResourceKind`]. Reads join the owner's identity row so
//! organization clauses are evaluated in the same query.

use super::{mysql_error_number, ER_NO_REFERENCED_ROW};
use crate::domain::{ProtectedResource, ResourceKind, StringUuid, WorkflowStatus};
use crate::error::{AppError, Result};
use crate::policy::{FilterColumns, RowFilter};
use async_trait::async_trait;
use sqlx::{MySql, MySqlPool, QueryBuilder};

const RESOURCE_FILTER_COLUMNS: FilterColumns = FilterColumns {
    owner: Some("r.owner_id"),
    owner_org: "o.org_id",
};

fn select_from(kind: ResourceKind) -> String {
    format!(
        "SELECT r.id, r.owner_id, o.org_id AS owner_org_id, r.payload, r.workflow_status, \
         r.workflow_note, r.created_at, r.updated_at \
         FROM {} r JOIN identities o ON o.id = r.owner_id WHERE ",
        kind.table()
    )
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceRepository: Send + Sync {
    async fn find_by_id(
        &self,
        kind: ResourceKind,
        id: StringUuid,
        filter: &RowFilter,
    ) -> Result<Option<ProtectedResource>>;
    async fn list(
        &self,
        kind: ResourceKind,
        filter: &RowFilter,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<ProtectedResource>>;
    async fn count(&self, kind: ResourceKind, filter: &RowFilter) -> Result<i64>;
    async fn create(
        &self,
        kind: ResourceKind,
        owner_id: StringUuid,
        payload: &serde_json::Value,
    ) -> Result<ProtectedResource>;

    // Writes touch the row only while it satisfies `guard`, the compiled
    // write rule; `None`/`false` means it did not.
    async fn update_payload(
        &self,
        kind: ResourceKind,
        id: StringUuid,
        payload: &serde_json::Value,
        guard: &RowFilter,
    ) -> Result<Option<ProtectedResource>>;
    async fn update_workflow(
        &self,
        kind: ResourceKind,
        id: StringUuid,
        status: WorkflowStatus,
        note: Option<String>,
        guard: &RowFilter,
    ) -> Result<Option<ProtectedResource>>;
    async fn delete(&self, kind: ResourceKind, id: StringUuid, guard: &RowFilter) -> Result<bool>;
    /// Privileged: protected rows of every kind owned by `owner_id`.
    async fn count_owned_by(&self, owner_id: StringUuid) -> Result<i64>;
}

pub struct ResourceRepositoryImpl {
    pool: MySqlPool,
}

fn joined(kind: ResourceKind) -> String {
    format!("{} r JOIN identities o ON o.id = r.owner_id", kind.table())
}

/// ` WHERE r.id = ? AND <guard>`
fn push_guard(qb: &mut QueryBuilder<'_, MySql>, id: StringUuid, guard: &RowFilter) {
    qb.push(" WHERE r.id = ").push_bind(id).push(" AND ");
    guard.push_sql(qb, &RESOURCE_FILTER_COLUMNS);
}

fn workflow_update(
    kind: ResourceKind,
    id: StringUuid,
    status: WorkflowStatus,
    note: Option<String>,
    guard: &RowFilter,
) -> QueryBuilder<'static, MySql> {
    let mut qb = QueryBuilder::new(format!(
        "UPDATE {} SET r.workflow_status = ",
        joined(kind)
    ));
    qb.push_bind(status)
        .push(", r.workflow_note = ")
        .push_bind(note)
        .push(", r.updated_at = NOW()");
    push_guard(&mut qb, id, guard);
    qb
}

impl ResourceRepositoryImpl {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, kind: ResourceKind, id: StringUuid) -> Result<ProtectedResource> {
        self.find_by_id(kind, id, &RowFilter::AllowAll)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} {} not found", kind, id)))
    }
}

#[async_trait]
impl ResourceRepository for ResourceRepositoryImpl {
    async fn find_by_id(
        &self,
        kind: ResourceKind,
        id: StringUuid,
        filter: &RowFilter,
    ) -> Result<Option<ProtectedResource>> {
        if filter.is_deny_all() {
            return Ok(None);
        }

        let mut qb = QueryBuilder::<MySql>::new(select_from(kind));
        qb.push("r.id = ").push_bind(id).push(" AND ");
        filter.push_sql(&mut qb, &RESOURCE_FILTER_COLUMNS);

        let row = qb
            .build_query_as::<ProtectedResource>()
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    async fn list(
        &self,
        kind: ResourceKind,
        filter: &RowFilter,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<ProtectedResource>> {
        if filter.is_deny_all() {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<MySql>::new(select_from(kind));
        filter.push_sql(&mut qb, &RESOURCE_FILTER_COLUMNS);
        qb.push(" ORDER BY r.created_at DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows = qb
            .build_query_as::<ProtectedResource>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    async fn count(&self, kind: ResourceKind, filter: &RowFilter) -> Result<i64> {
        if filter.is_deny_all() {
            return Ok(0);
        }

        let mut qb = QueryBuilder::<MySql>::new(format!(
            "SELECT COUNT(*) FROM {} r JOIN identities o ON o.id = r.owner_id WHERE ",
            kind.table()
        ));
        filter.push_sql(&mut qb, &RESOURCE_FILTER_COLUMNS);

        let row: (i64,) = qb.build_query_as().fetch_one(&self.pool).await?;
        Ok(row.0)
    }

    async fn create(
        &self,
        kind: ResourceKind,
        owner_id: StringUuid,
        payload: &serde_json::Value,
    ) -> Result<ProtectedResource> {
        let id = StringUuid::new_v4();
        let status = kind.supports_workflow().then_some(WorkflowStatus::Pending);

        let result = sqlx::query(&format!(
            "INSERT INTO {} (id, owner_id, payload, workflow_status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, NOW(), NOW())",
            kind.table()
        ))
        .bind(id)
        .bind(owner_id)
        .bind(payload)
        .bind(status)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {}
            Err(e) if mysql_error_number(&e) == Some(ER_NO_REFERENCED_ROW) => {
                return Err(AppError::BadRequest("Owner identity does not exist".to_string()))
            }
            Err(e) => return Err(e.into()),
        }

        self.fetch(kind, id).await
    }

    async fn update_payload(
        &self,
        kind: ResourceKind,
        id: StringUuid,
        payload: &serde_json::Value,
        guard: &RowFilter,
    ) -> Result<Option<ProtectedResource>> {
        if guard.is_deny_all() {
            return Ok(None);
        }

        let mut qb = QueryBuilder::<MySql>::new(format!("UPDATE {} SET r.payload = ", joined(kind)));
        qb.push_bind(payload.clone()).push(", r.updated_at = NOW()");
        push_guard(&mut qb, id, guard);

        let result = qb.build().execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.fetch(kind, id).await.map(Some)
    }

    async fn update_workflow(
        &self,
        kind: ResourceKind,
        id: StringUuid,
        status: WorkflowStatus,
        note: Option<String>,
        guard: &RowFilter,
    ) -> Result<Option<ProtectedResource>> {
        if guard.is_deny_all() {
            return Ok(None);
        }

        let result = workflow_update(kind, id, status, note, guard)
            .build()
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.fetch(kind, id).await.map(Some)
    }

    async fn delete(&self, kind: ResourceKind, id: StringUuid, guard: &RowFilter) -> Result<bool> {
        if guard.is_deny_all() {
            return Ok(false);
        }

        let mut qb = QueryBuilder::<MySql>::new(format!("DELETE r FROM {}", joined(kind)));
        push_guard(&mut qb, id, guard);

        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_owned_by(&self, owner_id: StringUuid) -> Result<i64> {
        let mut qb = QueryBuilder::<MySql>::new("SELECT CAST(COALESCE(SUM(n), 0) AS SIGNED) FROM (");
        for (i, kind) in ResourceKind::ALL.into_iter().enumerate() {
            if i > 0 {
                qb.push(" UNION ALL ");
            }
            qb.push(format!("SELECT COUNT(*) AS n FROM {} WHERE owner_id = ", kind.table()))
                .push_bind(owner_id);
        }
        qb.push(") owned");

        let row: (i64,) = qb.build_query_as().fetch_one(&self.pool).await?;
        Ok(row.0)
    }
}
