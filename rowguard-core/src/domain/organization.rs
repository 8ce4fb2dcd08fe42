//! Organization domain model

use super::common::StringUuid;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Organization status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrganizationStatus {
    #[default]
    Active,
    Suspended,
    Inactive,
}

impl std::str::FromStr for OrganizationStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(OrganizationStatus::Active),
            "suspended" => Ok(OrganizationStatus::Suspended),
            "inactive" => Ok(OrganizationStatus::Inactive),
            _ => Err(format!("Unknown organization status: {}", s)),
        }
    }
}

impl OrganizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrganizationStatus::Active => "active",
            OrganizationStatus::Suspended => "suspended",
            OrganizationStatus::Inactive => "inactive",
        }
    }
}

impl std::fmt::Display for OrganizationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'r> sqlx::Decode<'r, sqlx::MySql> for OrganizationStatus {
    fn decode(
        value: sqlx::mysql::MySqlValueRef<'r>,
    ) -> std::result::Result<Self, sqlx::error::BoxDynError> {
        let s: String = sqlx::Decode::<'r, sqlx::MySql>::decode(value)?;
        s.parse().map_err(|e: String| e.into())
    }
}

impl sqlx::Type<sqlx::MySql> for OrganizationStatus {
    fn type_info() -> sqlx::mysql::MySqlTypeInfo {
        <String as sqlx::Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &sqlx::mysql::MySqlTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::MySql>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::MySql> for OrganizationStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<u8>,
    ) -> std::result::Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <&str as sqlx::Encode<sqlx::MySql>>::encode_by_ref(&self.as_str(), buf)
    }
}

/// Tenant boundary record
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Organization {
    pub id: StringUuid,
    pub name: String,
    /// External registration identifier (e.g. a business registry number)
    pub registration_id: Option<String>,
    /// Email domain used to match principals at provisioning time
    pub domain: Option<String>,
    pub status: OrganizationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Organization {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: StringUuid::new_v4(),
            name: String::new(),
            registration_id: None,
            domain: None,
            status: OrganizationStatus::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Input for creating an organization
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateOrganizationInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1, max = 64))]
    pub registration_id: Option<String>,
    #[validate(length(min = 3, max = 253), custom(function = "validate_domain"))]
    pub domain: Option<String>,
}

/// Input for updating an organization
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateOrganizationInput {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub registration_id: Option<String>,
    #[validate(length(min = 3, max = 253), custom(function = "validate_domain"))]
    pub domain: Option<String>,
    pub status: Option<OrganizationStatus>,
}

/// Canonical form of an email domain: trimmed and ASCII-lowercased.
pub fn normalize_domain(domain: &str) -> String {
    domain.trim().to_ascii_lowercase()
}

fn validate_domain(domain: &str) -> Result<(), validator::ValidationError> {
    if DOMAIN_REGEX.is_match(&normalize_domain(domain)) {
        Ok(())
    } else {
        Err(validator::ValidationError::new("invalid_domain"))
    }
}

lazy_static::lazy_static! {
    pub static ref DOMAIN_REGEX: regex::Regex =
        regex::Regex::new(r"^[a-z0-9](?:[a-z0-9-]*[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]*[a-z0-9])?)+$").unwrap();
}
