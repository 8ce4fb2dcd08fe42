//! Data access layer (Repository pattern)
//!
//! Filtered methods take a compiled [`RowFilter`](crate::policy::RowFilter)
//! and append it to their `WHERE` clause. Methods documented as privileged
//! skip the filter and are reserved for the resolver, provisioning and
//! migrations.

pub mod identity;
pub mod organization;
pub mod resource;
pub mod role_migration;

pub use identity::IdentityRepository;
pub use organization::OrganizationRepository;
pub use resource::ResourceRepository;
pub use role_migration::RoleMigrationStore;

use sqlx::mysql::MySqlDatabaseError;

/// Duplicate entry for a unique key
pub(crate) const ER_DUP_ENTRY: u16 = 1062;
/// Parent row still referenced by a foreign key
pub(crate) const ER_ROW_IS_REFERENCED: u16 = 1451;
/// Child row references a missing parent
pub(crate) const ER_NO_REFERENCED_ROW: u16 = 1452;

/// MySQL server error number carried by a sqlx error, if any.
pub(crate) fn mysql_error_number(error: &sqlx::Error) -> Option<u16> {
    match error {
        sqlx::Error::Database(db) => db
            .try_downcast_ref::<MySqlDatabaseError>()
            .map(|e| e.number()),
        _ => None,
    }
}
