//! Application state traits for dependency injection
//!
//! Handlers are generic over [`HasServices`] so the same code runs against
//! the MySQL-backed `AppState` and against mock-backed test states.

use crate::config::Config;
use crate::middleware::PrincipalTokenReader;
use crate::repository::{IdentityRepository, OrganizationRepository, ResourceRepository};
use crate::service::{IdentityService, OrganizationService, ProvisioningService, ResourceService};

pub trait HasServices: Clone + Send + Sync + 'static {
    type IdentityRepo: IdentityRepository + 'static;
    type OrganizationRepo: OrganizationRepository + 'static;
    type ResourceRepo: ResourceRepository + 'static;

    fn config(&self) -> &Config;

    /// Reader for principal tokens issued by the authentication boundary
    fn token_reader(&self) -> &PrincipalTokenReader;

    fn identity_service(&self) -> &IdentityService<Self::IdentityRepo, Self::ResourceRepo>;

    fn organization_service(&self) -> &OrganizationService<Self::OrganizationRepo>;

    fn resource_service(&self) -> &ResourceService<Self::ResourceRepo, Self::IdentityRepo>;

    /// Auto-provisioning hook for principal-created events
    fn provisioning_service(
        &self,
    ) -> &ProvisioningService<Self::IdentityRepo, Self::OrganizationRepo>;
}
