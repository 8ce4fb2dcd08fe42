//! Identity domain model

use super::common::StringUuid;
use super::role::Role;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Internal profile bound to exactly one authenticated principal
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Identity {
    pub id: StringUuid,
    /// Opaque id issued by the authentication boundary
    pub principal_id: String,
    pub org_id: Option<StringUuid>,
    pub role: Role,
    pub email: String,
    pub display_name: Option<String>,
    pub phone: Option<String>,
    pub locale: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Identity {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: StringUuid::new_v4(),
            principal_id: String::new(),
            org_id: None,
            role: Role::default(),
            email: String::new(),
            display_name: None,
            phone: None,
            locale: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Input for creating an identity directly (top tier or service only)
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateIdentityInput {
    #[validate(length(min = 1, max = 255))]
    pub principal_id: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(max = 255))]
    pub display_name: Option<String>,
    pub org_id: Option<StringUuid>,
    #[serde(default)]
    pub role: Role,
}

/// Profile fields an owner (or a same-org administrator) may change
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateProfileInput {
    #[validate(length(max = 255))]
    pub display_name: Option<String>,
    #[validate(length(min = 3, max = 32))]
    pub phone: Option<String>,
    #[validate(length(min = 2, max = 16))]
    pub locale: Option<String>,
}

/// Role and organization reassignment
#[derive(Debug, Clone, Deserialize)]
pub struct ReassignInput {
    pub role: Role,
    /// `None` leaves the identity unaffiliated
    pub org_id: Option<StringUuid>,
}
