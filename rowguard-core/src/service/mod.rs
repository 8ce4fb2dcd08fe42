//! Business logic layer
//!
//! Every read goes through a compiled row filter and every write through
//! `policy::enforce` plus a guarded statement.

pub mod identity;
pub mod organization;
pub mod provisioning;
pub mod resource;

pub use identity::IdentityService;
pub use organization::OrganizationService;
pub use provisioning::{PrincipalEventHandler, ProvisioningOutcome, ProvisioningService};
pub use resource::ResourceService;

use crate::error::{AppError, Result};

/// Row offset of a 1-based page; pages past `i64` range are rejected.
pub(crate) fn page_offset(page: i64, per_page: i64) -> Result<i64> {
    page.checked_sub(1)
        .and_then(|skipped| skipped.checked_mul(per_page))
        .filter(|offset| *offset >= 0)
        .ok_or_else(|| AppError::BadRequest("page is out of range".to_string()))
}
