//! Protected resource rows
//!
//! Every protected row is owned by exactly one identity. The payload is opaque
//! to this engine; encryption and audit transport happen elsewhere.

use super::common::StringUuid;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Concrete protected resource types, one table each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    MfaSettings,
    OtpSecret,
    RecoveryCodes,
    SigningCertificate,
    SigningLog,
    VerificationMetadata,
    VerificationLog,
}

/// Access class shared by several resource kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    /// MFA configuration, one-time-credential secrets, recovery codes
    PersonalSecurity,
    /// Signing certificates and logs, verification metadata and logs
    AuditRecord,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 7] = [
        ResourceKind::MfaSettings,
        ResourceKind::OtpSecret,
        ResourceKind::RecoveryCodes,
        ResourceKind::SigningCertificate,
        ResourceKind::SigningLog,
        ResourceKind::VerificationMetadata,
        ResourceKind::VerificationLog,
    ];

    pub const fn table(self) -> &'static str {
        match self {
            ResourceKind::MfaSettings => "mfa_settings",
            ResourceKind::OtpSecret => "otp_secrets",
            ResourceKind::RecoveryCodes => "recovery_codes",
            ResourceKind::SigningCertificate => "signing_certificates",
            ResourceKind::SigningLog => "signing_logs",
            ResourceKind::VerificationMetadata => "verification_metadata",
            ResourceKind::VerificationLog => "verification_logs",
        }
    }

    pub const fn class(self) -> ResourceClass {
        match self {
            ResourceKind::MfaSettings | ResourceKind::OtpSecret | ResourceKind::RecoveryCodes => {
                ResourceClass::PersonalSecurity
            }
            ResourceKind::SigningCertificate
            | ResourceKind::SigningLog
            | ResourceKind::VerificationMetadata
            | ResourceKind::VerificationLog => ResourceClass::AuditRecord,
        }
    }

    /// Whether the kind carries verification-workflow fields
    pub const fn supports_workflow(self) -> bool {
        matches!(
            self,
            ResourceKind::VerificationMetadata | ResourceKind::VerificationLog
        )
    }

    /// URL path segment
    pub const fn as_str(self) -> &'static str {
        match self {
            ResourceKind::MfaSettings => "mfa-settings",
            ResourceKind::OtpSecret => "otp-secret",
            ResourceKind::RecoveryCodes => "recovery-codes",
            ResourceKind::SigningCertificate => "signing-certificate",
            ResourceKind::SigningLog => "signing-log",
            ResourceKind::VerificationMetadata => "verification-metadata",
            ResourceKind::VerificationLog => "verification-log",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("Unknown resource kind: {}", s))
    }
}

/// Verification workflow state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    InReview,
    Approved,
    Rejected,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::InReview => "in_review",
            WorkflowStatus::Approved => "approved",
            WorkflowStatus::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(WorkflowStatus::Pending),
            "in_review" => Ok(WorkflowStatus::InReview),
            "approved" => Ok(WorkflowStatus::Approved),
            "rejected" => Ok(WorkflowStatus::Rejected),
            _ => Err(format!("Unknown workflow status: {}", s)),
        }
    }
}

impl<'r> sqlx::Decode<'r, sqlx::MySql> for WorkflowStatus {
    fn decode(
        value: sqlx::mysql::MySqlValueRef<'r>,
    ) -> std::result::Result<Self, sqlx::error::BoxDynError> {
        let s: String = sqlx::Decode::<'r, sqlx::MySql>::decode(value)?;
        s.parse().map_err(|e: String| e.into())
    }
}

impl sqlx::Type<sqlx::MySql> for WorkflowStatus {
    fn type_info() -> sqlx::mysql::MySqlTypeInfo {
        <String as sqlx::Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &sqlx::mysql::MySqlTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::MySql>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::MySql> for WorkflowStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<u8>,
    ) -> std::result::Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <&str as sqlx::Encode<sqlx::MySql>>::encode_by_ref(&self.as_str(), buf)
    }
}

/// A protected row together with its owner's organization
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProtectedResource {
    pub id: StringUuid,
    pub owner_id: StringUuid,
    /// Organization of the owning identity at read time
    pub owner_org_id: Option<StringUuid>,
    pub payload: serde_json::Value,
    pub workflow_status: Option<WorkflowStatus>,
    pub workflow_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for ProtectedResource {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: StringUuid::new_v4(),
            owner_id: StringUuid::nil(),
            owner_org_id: None,
            payload: serde_json::Value::Null,
            workflow_status: None,
            workflow_note: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Input for creating a protected row
#[derive(Debug, Clone, Deserialize)]
pub struct CreateResourceInput {
    /// Defaults to the acting identity
    pub owner_id: Option<StringUuid>,
    pub payload: serde_json::Value,
}

/// Input for replacing the opaque payload
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateResourceInput {
    pub payload: serde_json::Value,
}

/// Verification-workflow fields, the only ones an operator may write
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct WorkflowUpdateInput {
    pub status: WorkflowStatus,
    #[validate(length(max = 1024))]
    pub note: Option<String>,
}

/// Owner of a protected row, as seen by the policy layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRow)]
pub struct OwnerRef {
    pub id: StringUuid,
    pub org_id: Option<StringUuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_segments_parse() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.as_str().parse::<ResourceKind>().unwrap(), kind);
        }
        assert!("users".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn test_serde_matches_path_segment() {
        for kind in ResourceKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_classes() {
        assert_eq!(
            ResourceKind::RecoveryCodes.class(),
            ResourceClass::PersonalSecurity
        );
        assert_eq!(ResourceKind::SigningLog.class(), ResourceClass::AuditRecord);
        let workflow: Vec<_> = ResourceKind::ALL
            .into_iter()
            .filter(|k| k.supports_workflow())
            .collect();
        assert_eq!(
            workflow,
            vec![
                ResourceKind::VerificationMetadata,
                ResourceKind::VerificationLog
            ]
        );
        assert!(workflow
            .iter()
            .all(|k| k.class() == ResourceClass::AuditRecord));
    }

    #[test]
    fn test_tables_are_distinct() {
        let mut tables: Vec<_> = ResourceKind::ALL.iter().map(|k| k.table()).collect();
        tables.sort();
        tables.dedup();
        assert_eq!(tables.len(), ResourceKind::ALL.len());
    }

    #[test]
    fn test_workflow_note_length() {
        let input = WorkflowUpdateInput {
            status: WorkflowStatus::InReview,
            note: Some("x".repeat(2000)),
        };
        assert!(input.validate().is_err());
    }
}
