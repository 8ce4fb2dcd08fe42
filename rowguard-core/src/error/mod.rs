//! Unified error handling for Rowguard Core

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Message returned for every policy rejection. Deliberately identical across
/// denial causes so callers cannot tell which condition failed.
pub const DENIED_MESSAGE: &str = "Operation not permitted";

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Authenticated principal with no provisioned identity yet.
    #[error("Principal is not provisioned")]
    PrincipalUnresolved,

    /// A write rejected by the policy rule set.
    #[error("Authorization denied")]
    AuthorizationDenied,

    /// Identity still owns protected resource rows.
    #[error("Identity still owns protected resources")]
    OwnerConstraintViolation,

    #[error("Migration state conflict: {0}")]
    MigrationStateConflict(String),

    /// Duplicate provisioning of the same principal. Absorbed by the
    /// provisioning hook; only escapes through direct repository use.
    #[error("Principal already provisioned")]
    ProvisioningConflict,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// True for the two rejection kinds produced by policy evaluation.
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            AppError::AuthorizationDenied | AppError::PrincipalUnresolved
        )
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            AppError::Validation(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "validation", msg.clone())
            }
            AppError::PrincipalUnresolved | AppError::AuthorizationDenied => (
                StatusCode::FORBIDDEN,
                "forbidden",
                DENIED_MESSAGE.to_string(),
            ),
            AppError::OwnerConstraintViolation => (
                StatusCode::CONFLICT,
                "owner_constraint",
                "Identity still owns protected resources".to_string(),
            ),
            AppError::ProvisioningConflict => (
                StatusCode::CONFLICT,
                "conflict",
                "Principal already provisioned".to_string(),
            ),
            AppError::MigrationStateConflict(msg) => {
                tracing::error!("Migration state conflict: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "migration_error",
                    "Schema is not in the expected state".to_string(),
                )
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}
