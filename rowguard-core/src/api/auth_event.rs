//! Principal-created webhook from the authentication boundary
//!
//! The boundary posts its account events here. Signup events are handed to
//! the auto-provisioning hook; everything else is acknowledged and dropped.

use crate::api::SuccessResponse;
use crate::domain::{PrincipalCreated, PrincipalId};
use crate::error::AppError;
use crate::service::PrincipalEventHandler;
use crate::state::HasServices;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-auth-signature";

/// Event types that mean "a new principal exists".
const SIGNUP_EVENTS: &[&str] = &["user.created", "SIGNUP", "REGISTER"];

/// Account event as posted by the authentication boundary
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthEvent {
    #[serde(rename = "type", alias = "eventType")]
    pub event_type: String,
    #[serde(default, alias = "user_id", alias = "principalId", alias = "principal_id")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "display_name")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub details: AuthEventDetails,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthEventDetails {
    pub email: Option<String>,
    pub username: Option<String>,
}

impl AuthEvent {
    pub fn is_signup(&self) -> bool {
        SIGNUP_EVENTS.contains(&self.event_type.as_str())
    }

    /// Top-level fields win over `details`.
    pub fn to_principal_created(&self) -> Result<PrincipalCreated, AppError> {
        let principal_id = self
            .user_id
            .clone()
            .and_then(PrincipalId::new)
            .ok_or_else(|| AppError::BadRequest("Event has no principal id".to_string()))?;
        let email = self
            .email
            .clone()
            .or_else(|| self.details.email.clone())
            .filter(|email| !email.trim().is_empty())
            .ok_or_else(|| AppError::BadRequest("Event has no email".to_string()))?;

        Ok(PrincipalCreated {
            principal_id,
            email,
            display_name: self
                .display_name
                .clone()
                .or_else(|| self.details.username.clone()),
        })
    }
}

/// Check a `sha256=<hex>` HMAC signature over the raw body.
fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let expected_hex = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(expected) = hex::decode(expected_hex) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// POST /api/v1/auth/events
pub async fn receive<S: HasServices>(
    State(state): State<S>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    if let Some(secret) = &state.config().auth.webhook_secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if signature.is_empty() {
            warn!("Auth event received without signature header");
            return Err(AppError::Unauthorized(
                "Missing webhook signature".to_string(),
            ));
        }
        if !verify_signature(secret, &body, signature) {
            warn!("Auth event signature verification failed");
            return Err(AppError::Unauthorized(
                "Invalid webhook signature".to_string(),
            ));
        }
    } else {
        debug!("Auth event signature verification skipped (no secret configured)");
    }

    let event: AuthEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid event payload: {}", e)))?;

    if !event.is_signup() {
        debug!(event_type = %event.event_type, "Ignoring non-signup auth event");
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let created = event.to_principal_created()?;
    match state
        .provisioning_service()
        .handle_principal_created(&created)
        .await?
    {
        Some(outcome) => {
            let status = if outcome.is_created() {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            Ok((status, Json(SuccessResponse::new(outcome.identity().clone()))).into_response())
        }
        // Swallowed failure; the signup goes ahead
        None => Ok(StatusCode::ACCEPTED.into_response()),
    }
}
