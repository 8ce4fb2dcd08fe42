//! Auto-provisioning of identities for newly created principals

use crate::config::{ProvisioningConfig, ProvisioningFailureMode};
use crate::context::{Actor, ServiceGrant};
use crate::domain::{email_domain, CreateIdentityInput, Identity, PrincipalCreated, Role, StringUuid};
use crate::error::{AppError, Result};
use crate::policy::{self, Action, ResourceRef, ResourceType};
use crate::repository::{IdentityRepository, OrganizationRepository};
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum ProvisioningOutcome {
    Created(Identity),
    AlreadyProvisioned(Identity),
}

impl ProvisioningOutcome {
    pub fn identity(&self) -> &Identity {
        match self {
            ProvisioningOutcome::Created(identity)
            | ProvisioningOutcome::AlreadyProvisioned(identity) => identity,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, ProvisioningOutcome::Created(_))
    }
}

/// Subscriber for "principal created" events coming from the signup flow.
#[async_trait]
pub trait PrincipalEventHandler: Send + Sync {
    /// `Ok(None)` means the failure was swallowed and signup must continue.
    async fn handle_principal_created(
        &self,
        event: &PrincipalCreated,
    ) -> Result<Option<ProvisioningOutcome>>;
}

pub struct ProvisioningService<I: IdentityRepository, O: OrganizationRepository> {
    identities: Arc<I>,
    organizations: Arc<O>,
    config: ProvisioningConfig,
}

impl<I: IdentityRepository, O: OrganizationRepository> ProvisioningService<I, O> {
    pub fn new(identities: Arc<I>, organizations: Arc<O>, config: ProvisioningConfig) -> Self {
        Self {
            identities,
            organizations,
            config,
        }
    }

    /// Create the identity for `event` unless one already exists.
    pub async fn provision(
        &self,
        grant: &ServiceGrant,
        event: &PrincipalCreated,
    ) -> Result<ProvisioningOutcome> {
        if let Some(existing) = self.identities.find_by_principal(&event.principal_id).await? {
            tracing::debug!(principal = %event.principal_id, "Principal already provisioned");
            return Ok(ProvisioningOutcome::AlreadyProvisioned(existing));
        }

        let (role, org_id) = self.assignment_for(&event.email).await?;

        let actor = Actor::Service(grant.clone());
        let target = ResourceRef {
            resource: ResourceType::Identity,
            owner_id: None,
            owner_org_id: org_id,
        };
        policy::enforce(&actor, &target, Action::Insert)?;

        let input = CreateIdentityInput {
            principal_id: event.principal_id.as_str().to_string(),
            email: event.email.trim().to_string(),
            display_name: event.display_name.clone(),
            org_id,
            role,
        };

        match self.identities.create(&input).await {
            Ok(identity) => {
                tracing::info!(
                    job = grant.job(),
                    principal = %event.principal_id,
                    identity_id = %identity.id,
                    role = %identity.role,
                    org_id = ?identity.org_id,
                    "Identity provisioned"
                );
                Ok(ProvisioningOutcome::Created(identity))
            }
            // Lost a race with a concurrent provisioning of the same principal
            Err(AppError::ProvisioningConflict) => {
                let existing = self
                    .identities
                    .find_by_principal(&event.principal_id)
                    .await?
                    .ok_or(AppError::ProvisioningConflict)?;
                Ok(ProvisioningOutcome::AlreadyProvisioned(existing))
            }
            Err(e) => Err(e),
        }
    }

    /// Role and organization implied by the principal's email domain.
    async fn assignment_for(&self, email: &str) -> Result<(Role, Option<StringUuid>)> {
        let Some(domain) = email_domain(email) else {
            return Ok((Role::LOWEST, None));
        };

        if domain == self.config.home_domain {
            let home = self.organizations.find_by_domain(&domain).await?;
            if home.is_none() {
                tracing::warn!(
                    domain = %domain,
                    "Home organization is missing; provisioning top-tier identity unaffiliated"
                );
            }
            return Ok((Role::TOP, home.map(|org| org.id)));
        }

        let org = self.organizations.find_by_domain(&domain).await?;
        Ok((Role::LOWEST, org.map(|org| org.id)))
    }
}

#[async_trait]
impl<I: IdentityRepository, O: OrganizationRepository> PrincipalEventHandler
    for ProvisioningService<I, O>
{
    async fn handle_principal_created(
        &self,
        event: &PrincipalCreated,
    ) -> Result<Option<ProvisioningOutcome>> {
        let grant = ServiceGrant::issue("auto-provisioning");
        match self.provision(&grant, event).await {
            Ok(outcome) => Ok(Some(outcome)),
            Err(e) => match self.config.failure_mode {
                ProvisioningFailureMode::Swallow => {
                    tracing::warn!(
                        principal = %event.principal_id,
                        error = %e,
                        "Provisioning failed; signup continues without an identity"
                    );
                    Ok(None)
                }
                ProvisioningFailureMode::Propagate => Err(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Organization, PrincipalId};
    use crate::repository::identity::MockIdentityRepository;
    use crate::repository::organization::MockOrganizationRepository;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const HOME: &str = "home.example";
    const PARTNER: &str = "partner.example";

    fn config(failure_mode: ProvisioningFailureMode) -> ProvisioningConfig {
        ProvisioningConfig {
            home_domain: HOME.to_string(),
            failure_mode,
        }
    }

    fn event(principal: &str, email: &str) -> PrincipalCreated {
        PrincipalCreated {
            principal_id: PrincipalId::new(principal).unwrap(),
            email: email.to_string(),
            display_name: None,
        }
    }

    fn org(domain: &str) -> Organization {
        Organization {
            domain: Some(domain.to_string()),
            ..Default::default()
        }
    }

    fn directory(orgs: Vec<Organization>) -> MockOrganizationRepository {
        let mut repo = MockOrganizationRepository::new();
        repo.expect_find_by_domain().returning(move |domain| {
            Ok(orgs
                .iter()
                .find(|o| o.domain.as_deref() == Some(domain))
                .cloned())
        });
        repo
    }

    /// Identity table keyed by principal; duplicates are refused.
    fn identity_table() -> MockIdentityRepository {
        let rows: Arc<Mutex<HashMap<String, Identity>>> = Arc::default();
        let mut repo = MockIdentityRepository::new();

        let lookup = rows.clone();
        repo.expect_find_by_principal().returning(move |principal| {
            Ok(lookup.lock().unwrap().get(principal.as_str()).cloned())
        });

        repo.expect_create().returning(move |input| {
            let mut rows = rows.lock().unwrap();
            if rows.contains_key(&input.principal_id) {
                return Err(AppError::ProvisioningConflict);
            }
            let identity = Identity {
                principal_id: input.principal_id.clone(),
                email: input.email.clone(),
                org_id: input.org_id,
                role: input.role,
                ..Default::default()
            };
            rows.insert(input.principal_id.clone(), identity.clone());
            Ok(identity)
        });

        repo
    }

    fn service(
        identities: MockIdentityRepository,
        organizations: MockOrganizationRepository,
        mode: ProvisioningFailureMode,
    ) -> ProvisioningService<MockIdentityRepository, MockOrganizationRepository> {
        ProvisioningService::new(Arc::new(identities), Arc::new(organizations), config(mode))
    }

    #[tokio::test]
    async fn test_home_domain_gets_top_tier_and_home_org() {
        let home = org(HOME);
        let svc = service(
            identity_table(),
            directory(vec![home.clone(), org(PARTNER)]),
            ProvisioningFailureMode::Swallow,
        );
        let outcome = svc
            .provision(&ServiceGrant::issue("test"), &event("kc-a", "a@home.example"))
            .await
            .unwrap();
        assert!(outcome.is_created());
        assert_eq!(outcome.identity().role, Role::SuperAdmin);
        assert_eq!(outcome.identity().org_id, Some(home.id));
    }

    #[tokio::test]
    async fn test_partner_domain_gets_lowest_tier_and_partner_org() {
        let partner = org(PARTNER);
        let svc = service(
            identity_table(),
            directory(vec![org(HOME), partner.clone()]),
            ProvisioningFailureMode::Swallow,
        );
        let outcome = svc
            .provision(&ServiceGrant::issue("test"), &event("kc-b", "b@Partner.Example"))
            .await
            .unwrap();
        assert_eq!(outcome.identity().role, Role::Citizen);
        assert_eq!(outcome.identity().org_id, Some(partner.id));
    }

    #[tokio::test]
    async fn test_unknown_domain_is_unaffiliated() {
        let svc = service(
            identity_table(),
            directory(vec![org(HOME), org(PARTNER)]),
            ProvisioningFailureMode::Swallow,
        );
        let outcome = svc
            .provision(&ServiceGrant::issue("test"), &event("kc-c", "c@unknown.example"))
            .await
            .unwrap();
        assert_eq!(outcome.identity().role, Role::Citizen);
        assert_eq!(outcome.identity().org_id, None);
    }

    #[tokio::test]
    async fn test_subdomain_of_home_is_not_home() {
        let svc = service(
            identity_table(),
            directory(vec![org(HOME)]),
            ProvisioningFailureMode::Swallow,
        );
        let outcome = svc
            .provision(
                &ServiceGrant::issue("test"),
                &event("kc-d", "d@mail.home.example"),
            )
            .await
            .unwrap();
        assert_eq!(outcome.identity().role, Role::Citizen);
        assert_eq!(outcome.identity().org_id, None);
    }

    #[tokio::test]
    async fn test_missing_home_org_still_grants_top_tier() {
        let svc = service(
            identity_table(),
            directory(vec![]),
            ProvisioningFailureMode::Swallow,
        );
        let outcome = svc
            .provision(&ServiceGrant::issue("test"), &event("kc-a", "a@home.example"))
            .await
            .unwrap();
        assert_eq!(outcome.identity().role, Role::SuperAdmin);
        assert_eq!(outcome.identity().org_id, None);
    }

    #[tokio::test]
    async fn test_provisioning_twice_yields_one_identity() {
        let svc = service(
            identity_table(),
            directory(vec![org(PARTNER)]),
            ProvisioningFailureMode::Swallow,
        );
        let grant = ServiceGrant::issue("test");
        let first = svc
            .provision(&grant, &event("kc-b", "b@partner.example"))
            .await
            .unwrap();
        let second = svc
            .provision(&grant, &event("kc-b", "b@partner.example"))
            .await
            .unwrap();

        assert!(first.is_created());
        assert!(!second.is_created());
        assert_eq!(first.identity().id, second.identity().id);
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_resolves_to_existing() {
        let existing = Identity {
            principal_id: "kc-race".to_string(),
            ..Default::default()
        };
        let winner = existing.clone();
        let calls = Arc::new(Mutex::new(0));

        let mut identities = MockIdentityRepository::new();
        identities.expect_find_by_principal().returning(move |_| {
            let mut n = calls.lock().unwrap();
            *n += 1;
            // Absent on the first check, present after the insert races
            Ok(if *n == 1 { None } else { Some(winner.clone()) })
        });
        identities
            .expect_create()
            .returning(|_| Err(AppError::ProvisioningConflict));

        let svc = service(identities, directory(vec![]), ProvisioningFailureMode::Propagate);
        let outcome = svc
            .handle_principal_created(&event("kc-race", "r@unknown.example"))
            .await
            .unwrap()
            .unwrap();
        assert!(!outcome.is_created());
        assert_eq!(outcome.identity().id, existing.id);
    }

    fn failing_identities() -> MockIdentityRepository {
        let mut identities = MockIdentityRepository::new();
        identities.expect_find_by_principal().returning(|_| Ok(None));
        identities
            .expect_create()
            .returning(|_| Err(AppError::Internal(anyhow::anyhow!("store unavailable"))));
        identities
    }

    #[tokio::test]
    async fn test_swallow_mode_never_fails_signup() {
        let svc = service(
            failing_identities(),
            directory(vec![]),
            ProvisioningFailureMode::Swallow,
        );
        let result = svc
            .handle_principal_created(&event("kc-e", "e@unknown.example"))
            .await;
        assert!(matches!(result, Ok(None)));
    }

    #[tokio::test]
    async fn test_propagate_mode_surfaces_failure() {
        let svc = service(
            failing_identities(),
            directory(vec![]),
            ProvisioningFailureMode::Propagate,
        );
        let result = svc
            .handle_principal_created(&event("kc-e", "e@unknown.example"))
            .await;
        assert!(matches!(result, Err(AppError::Internal(_))));
    }
}
