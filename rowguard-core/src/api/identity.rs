//! Identity API handlers

use crate::api::{MessageResponse, PaginatedResponse, PaginationQuery, SuccessResponse};
use crate::domain::{CreateIdentityInput, ReassignInput, UpdateProfileInput};
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

/// Current caller's identity
pub async fn me<S: HasServices>(
    State(state): State<S>,
    auth: AuthPrincipal,
) -> Result<impl IntoResponse> {
    let identity = state.identity_service().me(&auth.context()).await?;
    Ok(Json(SuccessResponse::new(identity)))
}

/// List visible identities
pub async fn list<S: HasServices>(
    State(state): State<S>,
    auth: AuthPrincipal,
    Query(pagination): Query<PaginationQuery>,
) -> Result<impl IntoResponse> {
    let (identities, total) = state
        .identity_service()
        .list(&auth.context(), pagination.page, pagination.per_page)
        .await?;

    Ok(Json(PaginatedResponse::new(
        identities,
        pagination.page,
        pagination.per_page,
        total,
    )))
}

pub async fn get<S: HasServices>(
    State(state): State<S>,
    auth: AuthPrincipal,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let identity = state
        .identity_service()
        .get(&auth.context(), id.into())
        .await?;
    Ok(Json(SuccessResponse::new(identity)))
}

/// Create identity directly (back-office)
pub async fn create<S: HasServices>(
    State(state): State<S>,
    auth: AuthPrincipal,
    Json(input): Json<CreateIdentityInput>,
) -> Result<impl IntoResponse> {
    let identity = state
        .identity_service()
        .create(&auth.context(), input)
        .await?;
    Ok((StatusCode::CREATED, Json(SuccessResponse::new(identity))))
}

/// Update profile fields
pub async fn update_profile<S: HasServices>(
    State(state): State<S>,
    auth: AuthPrincipal,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateProfileInput>,
) -> Result<impl IntoResponse> {
    let identity = state
        .identity_service()
        .update_profile(&auth.context(), id.into(), input)
        .await?;
    Ok(Json(SuccessResponse::new(identity)))
}

/// Change role and organization
pub async fn reassign<S: HasServices>(
    State(state): State<S>,
    auth: AuthPrincipal,
    Path(id): Path<Uuid>,
    Json(input): Json<ReassignInput>,
) -> Result<impl IntoResponse> {
    let identity = state
        .identity_service()
        .reassign(&auth.context(), id.into(), input)
        .await?;
    Ok(Json(SuccessResponse::new(identity)))
}

pub async fn delete<S: HasServices>(
    State(state): State<S>,
    auth: AuthPrincipal,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    state
        .identity_service()
        .delete(&auth.context(), id.into())
        .await?;
    Ok(Json(MessageResponse::new("Identity deleted successfully")))
}
