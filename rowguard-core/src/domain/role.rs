//! Role hierarchy
//!
//! Four privilege tiers with a fixed total order. Tier checks compare the
//! integer discriminant, never the textual name.

use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Role {
    #[default]
    Citizen = 0,
    Operator = 1,
    OrgAdmin = 2,
    SuperAdmin = 3,
}

impl Role {
    /// Every tier, lowest first.
    pub const ALL: [Role; 4] = [
        Role::Citizen,
        Role::Operator,
        Role::OrgAdmin,
        Role::SuperAdmin,
    ];

    /// Tier assigned when nothing better is known.
    pub const LOWEST: Role = Role::Citizen;

    /// Tier with unconditional access.
    pub const TOP: Role = Role::SuperAdmin;

    pub const fn rank(self) -> u8 {
        self as u8
    }

    pub const fn meets_threshold(self, minimum: Role) -> bool {
        self.rank() >= minimum.rank()
    }

    pub const fn is_top(self) -> bool {
        self.rank() == Role::TOP.rank()
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Citizen => "citizen",
            Role::Operator => "operator",
            Role::OrgAdmin => "org_admin",
            Role::SuperAdmin => "super_admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "citizen" => Ok(Role::Citizen),
            "operator" => Ok(Role::Operator),
            "org_admin" => Ok(Role::OrgAdmin),
            "super_admin" => Ok(Role::SuperAdmin),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

impl sqlx::Type<sqlx::MySql> for Role {
    fn type_info() -> sqlx::mysql::MySqlTypeInfo {
        <String as sqlx::Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &sqlx::mysql::MySqlTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::MySql>>::compatible(ty)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::MySql> for Role {
    fn decode(
        value: sqlx::mysql::MySqlValueRef<'r>,
    ) -> std::result::Result<Self, sqlx::error::BoxDynError> {
        let s: String = sqlx::Decode::<'r, sqlx::MySql>::decode(value)?;
        s.parse().map_err(|e: String| e.into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::MySql> for Role {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<u8>,
    ) -> std::result::Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <&str as sqlx::Encode<sqlx::MySql>>::encode_by_ref(&self.as_str(), buf)
    }
}
