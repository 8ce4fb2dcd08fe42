//! Principal extraction from the upstream bearer token
//!
//! The authentication boundary has already verified the caller. This module
//! only reads the opaque principal id (`sub`) out of the token it issued.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::config::AuthBoundaryConfig;
use crate::context::RequestContext;
use crate::domain::PrincipalId;
use crate::state::HasServices;

/// Claims read from the principal token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrincipalClaims {
    /// Opaque principal id
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

/// Decodes principal tokens issued by the authentication boundary.
#[derive(Clone)]
pub struct PrincipalTokenReader {
    decoding_key: DecodingKey,
    issuer: Option<String>,
}

impl PrincipalTokenReader {
    pub fn new(config: &AuthBoundaryConfig) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            issuer: config.jwt_issuer.clone(),
        }
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "sub"]);
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        validation
    }

    pub fn read(&self, token: &str) -> Result<PrincipalId, AuthError> {
        let data = decode::<PrincipalClaims>(token, &self.decoding_key, &self.validation())
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(e.to_string()),
            })?;

        PrincipalId::new(data.claims.sub)
            .ok_or_else(|| AuthError::InvalidToken("Empty subject".to_string()))
    }
}

/// Authentication errors
#[derive(Debug, Clone)]
pub enum AuthError {
    /// No Authorization header present
    MissingToken,
    /// Invalid Authorization header format
    InvalidHeader(String),
    /// Token validation failed
    InvalidToken(String),
    /// Token has expired
    TokenExpired,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match &self {
            AuthError::MissingToken => "Missing authorization token",
            AuthError::InvalidHeader(_) => "Invalid authorization header",
            AuthError::InvalidToken(detail) => {
                tracing::debug!(detail = %detail, "Rejected principal token");
                "Invalid token"
            }
            AuthError::TokenExpired => "Token has expired",
        };

        let body = serde_json::json!({
            "error": "unauthorized",
            "message": message,
        });

        (StatusCode::UNAUTHORIZED, axum::Json(body)).into_response()
    }
}

fn extract_bearer_token(headers: &axum::http::HeaderMap) -> Result<&str, AuthError> {
    let auth_header = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingToken)?
        .to_str()
        .map_err(|_| AuthError::InvalidHeader("Invalid header encoding".to_string()))?;

    auth_header
        .strip_prefix("Bearer ")
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            AuthError::InvalidHeader("Authorization header must use Bearer scheme".to_string())
        })
}

/// Axum extractor for the calling principal
///
/// ```ignore
/// async fn handler(auth: AuthPrincipal, State(state): State<AppState>) {
///     let ctx = auth.context();
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AuthPrincipal(pub PrincipalId);

impl AuthPrincipal {
    /// Fresh request-scoped context; the actor is resolved on first use.
    pub fn context(&self) -> RequestContext {
        RequestContext::for_principal(self.0.clone())
    }
}

impl<S> FromRequestParts<S> for AuthPrincipal
where
    S: HasServices,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers)?;
        state.token_reader().read(token).map(AuthPrincipal)
    }
}
