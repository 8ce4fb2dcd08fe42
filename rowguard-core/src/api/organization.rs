//! Organization API handlers

use crate::api::{MessageResponse, PaginatedResponse, PaginationQuery, SuccessResponse};
use crate::domain::{CreateOrganizationInput, UpdateOrganizationInput};
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

/// List organizations
pub async fn list<S: HasServices>(
    State(state): State<S>,
    auth: AuthPrincipal,
    Query(pagination): Query<PaginationQuery>,
) -> Result<impl IntoResponse> {
    let (orgs, total) = state
        .organization_service()
        .list(&auth.context(), pagination.page, pagination.per_page)
        .await?;

    Ok(Json(PaginatedResponse::new(
        orgs,
        pagination.page,
        pagination.per_page,
        total,
    )))
}

/// Get organization by ID
pub async fn get<S: HasServices>(
    State(state): State<S>,
    auth: AuthPrincipal,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let org = state
        .organization_service()
        .get(&auth.context(), id.into())
        .await?;
    Ok(Json(SuccessResponse::new(org)))
}

/// Create organization
pub async fn create<S: HasServices>(
    State(state): State<S>,
    auth: AuthPrincipal,
    Json(input): Json<CreateOrganizationInput>,
) -> Result<impl IntoResponse> {
    let org = state
        .organization_service()
        .create(&auth.context(), input)
        .await?;
    Ok((StatusCode::CREATED, Json(SuccessResponse::new(org))))
}

/// Update organization
pub async fn update<S: HasServices>(
    State(state): State<S>,
    auth: AuthPrincipal,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateOrganizationInput>,
) -> Result<impl IntoResponse> {
    let org = state
        .organization_service()
        .update(&auth.context(), id.into(), input)
        .await?;
    Ok(Json(SuccessResponse::new(org)))
}

/// Delete organization; members become unaffiliated
pub async fn delete<S: HasServices>(
    State(state): State<S>,
    auth: AuthPrincipal,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    state
        .organization_service()
        .delete(&auth.context(), id.into())
        .await?;
    Ok(Json(MessageResponse::new("Organization deleted successfully")))
}
