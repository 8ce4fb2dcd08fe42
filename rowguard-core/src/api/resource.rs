//! Protected resource API handlers
//!
//! Rows are addressed as `/resources/{kind}/{id}`, where `kind` is one of the
//! kebab-case resource kinds such as `mfa-settings` or `verification-log`.

use crate::api::{MessageResponse, PaginatedResponse, PaginationQuery, SuccessResponse};
use crate::domain::{CreateResourceInput, ResourceKind, UpdateResourceInput, WorkflowUpdateInput};
use crate::error::Result;
use crate::middleware::AuthPrincipal;
use crate::state::HasServices;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

pub async fn list<S: HasServices>(
    State(state): State<S>,
    auth: AuthPrincipal,
    Path(kind): Path<ResourceKind>,
    Query(pagination): Query<PaginationQuery>,
) -> Result<impl IntoResponse> {
    let (rows, total) = state
        .resource_service()
        .list(&auth.context(), kind, pagination.page, pagination.per_page)
        .await?;

    Ok(Json(PaginatedResponse::new(
        rows,
        pagination.page,
        pagination.per_page,
        total,
    )))
}

pub async fn get<S: HasServices>(
    State(state): State<S>,
    auth: AuthPrincipal,
    Path((kind, id)): Path<(ResourceKind, Uuid)>,
) -> Result<impl IntoResponse> {
    let row = state
        .resource_service()
        .get(&auth.context(), kind, id.into())
        .await?;
    Ok(Json(SuccessResponse::new(row)))
}

pub async fn create<S: HasServices>(
    State(state): State<S>,
    auth: AuthPrincipal,
    Path(kind): Path<ResourceKind>,
    Json(input): Json<CreateResourceInput>,
) -> Result<impl IntoResponse> {
    let row = state
        .resource_service()
        .create(&auth.context(), kind, input)
        .await?;
    Ok((StatusCode::CREATED, Json(SuccessResponse::new(row))))
}

/// Replace the payload
pub async fn update<S: HasServices>(
    State(state): State<S>,
    auth: AuthPrincipal,
    Path((kind, id)): Path<(ResourceKind, Uuid)>,
    Json(input): Json<UpdateResourceInput>,
) -> Result<impl IntoResponse> {
    let row = state
        .resource_service()
        .update(&auth.context(), kind, id.into(), input)
        .await?;
    Ok(Json(SuccessResponse::new(row)))
}

/// Change verification workflow status
pub async fn update_workflow<S: HasServices>(
    State(state): State<S>,
    auth: AuthPrincipal,
    Path((kind, id)): Path<(ResourceKind, Uuid)>,
    Json(input): Json<WorkflowUpdateInput>,
) -> Result<impl IntoResponse> {
    let row = state
        .resource_service()
        .update_workflow(&auth.context(), kind, id.into(), input)
        .await?;
    Ok(Json(SuccessResponse::new(row)))
}

pub async fn delete<S: HasServices>(
    State(state): State<S>,
    auth: AuthPrincipal,
    Path((kind, id)): Path<(ResourceKind, Uuid)>,
) -> Result<impl IntoResponse> {
    state
        .resource_service()
        .delete(&auth.context(), kind, id.into())
        .await?;
    Ok(Json(MessageResponse::new("Resource deleted successfully")))
}
