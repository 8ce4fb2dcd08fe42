//! Organization business logic

use crate::context::RequestContext;
use crate::domain::{
    normalize_domain, CreateOrganizationInput, Organization, StringUuid, UpdateOrganizationInput,
};
use crate::error::{AppError, Result};
use crate::policy::{self, Action, ResourceRef, ResourceType, RowFilter};
use crate::repository::OrganizationRepository;
use crate::resolver::PrincipalResolver;
use std::sync::Arc;
use validator::Validate;

pub struct OrganizationService<R: OrganizationRepository> {
    repo: Arc<R>,
    resolver: Arc<dyn PrincipalResolver>,
}

impl<R: OrganizationRepository> OrganizationService<R> {
    pub fn new(repo: Arc<R>, resolver: Arc<dyn PrincipalResolver>) -> Self {
        Self { repo, resolver }
    }

    pub async fn get(&self, ctx: &RequestContext, id: StringUuid) -> Result<Organization> {
        let actor = ctx.actor(self.resolver.as_ref()).await?;
        let filter = RowFilter::compile(actor, ResourceType::Organization);
        self.repo
            .find_by_id(id, &filter)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Organization {} not found", id)))
    }

    pub async fn list(
        &self,
        ctx: &RequestContext,
        page: i64,
        per_page: i64,
    ) -> Result<(Vec<Organization>, i64)> {
        let actor = ctx.actor(self.resolver.as_ref()).await?;
        let filter = RowFilter::compile(actor, ResourceType::Organization);
        let offset = super::page_offset(page, per_page)?;
        let orgs = self.repo.list(&filter, offset, per_page).await?;
        let total = self.repo.count(&filter).await?;
        Ok((orgs, total))
    }

    pub async fn create(
        &self,
        ctx: &RequestContext,
        input: CreateOrganizationInput,
    ) -> Result<Organization> {
        input.validate()?;

        let actor = ctx.actor(self.resolver.as_ref()).await?;
        policy::enforce(actor, &ResourceRef::organization(None), Action::Insert)?;

        if let Some(domain) = &input.domain {
            self.ensure_domain_free(domain, None).await?;
        }

        let org = self.repo.create(&input).await?;
        tracing::info!(org_id = %org.id, domain = ?org.domain, "Organization created");
        Ok(org)
    }

    pub async fn update(
        &self,
        ctx: &RequestContext,
        id: StringUuid,
        input: UpdateOrganizationInput,
    ) -> Result<Organization> {
        input.validate()?;

        self.load_for_write(ctx, id, Action::Update).await?;

        if let Some(domain) = &input.domain {
            self.ensure_domain_free(domain, Some(id)).await?;
        }

        self.repo.update(id, &input).await
    }

    /// Member identities are kept and become unaffiliated.
    pub async fn delete(&self, ctx: &RequestContext, id: StringUuid) -> Result<()> {
        self.load_for_write(ctx, id, Action::Delete).await?;

        self.repo.delete(id).await?;
        tracing::info!(org_id = %id, "Organization deleted; members are now unaffiliated");
        Ok(())
    }

    async fn load_for_write(
        &self,
        ctx: &RequestContext,
        id: StringUuid,
        action: Action,
    ) -> Result<Organization> {
        let actor = ctx.actor(self.resolver.as_ref()).await?;
        let filter = RowFilter::compile(actor, ResourceType::Organization);
        let Some(existing) = self.repo.find_by_id(id, &filter).await? else {
            return Err(if filter.is_allow_all() {
                AppError::NotFound(format!("Organization {} not found", id))
            } else {
                policy::denial(actor)
            });
        };
        policy::enforce(actor, &ResourceRef::from(&existing), action)?;
        Ok(existing)
    }

    async fn ensure_domain_free(&self, domain: &str, owner: Option<StringUuid>) -> Result<()> {
        let domain = normalize_domain(domain);
        match self.repo.find_by_domain(&domain).await? {
            Some(other) if Some(other.id) != owner => Err(AppError::Conflict(format!(
                "Domain '{}' is already assigned to another organization",
                domain
            ))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::IdentityContext;
    use crate::domain::{PrincipalId, Role};
    use crate::repository::organization::MockOrganizationRepository;
    use crate::resolver::MockPrincipalResolver;
    use mockall::predicate::*;

    fn resolver(role: Role, org_id: Option<StringUuid>) -> Arc<MockPrincipalResolver> {
        let ctx = IdentityContext {
            identity_id: StringUuid::new_v4(),
            org_id,
            role,
        };
        let mut resolver = MockPrincipalResolver::new();
        resolver.expect_resolve().returning(move |_| Ok(Some(ctx)));
        Arc::new(resolver)
    }

    fn request() -> RequestContext {
        RequestContext::for_principal(PrincipalId::new("kc-caller").unwrap())
    }

    fn create_input(domain: &str) -> CreateOrganizationInput {
        CreateOrganizationInput {
            name: "Partner".to_string(),
            registration_id: None,
            domain: Some(domain.to_string()),
        }
    }

    #[tokio::test]
    async fn test_any_resolved_identity_reads_directory() {
        let org = Organization::default();
        let org_clone = org.clone();
        let mut repo = MockOrganizationRepository::new();
        repo.expect_find_by_id()
            .withf(|_, filter| filter.is_allow_all())
            .returning(move |_, _| Ok(Some(org_clone.clone())));

        let svc = OrganizationService::new(Arc::new(repo), resolver(Role::Citizen, None));
        assert_eq!(svc.get(&request(), org.id).await.unwrap().id, org.id);
    }

    #[tokio::test]
    async fn test_unresolved_lists_nothing() {
        let mut repo = MockOrganizationRepository::new();
        repo.expect_list().returning(|filter, _, _| {
            Ok(if filter.is_deny_all() {
                vec![]
            } else {
                vec![Organization::default()]
            })
        });
        repo.expect_count()
            .returning(|filter| Ok(if filter.is_deny_all() { 0 } else { 1 }));

        let mut unresolved = MockPrincipalResolver::new();
        unresolved.expect_resolve().returning(|_| Ok(None));
        let svc = OrganizationService::new(Arc::new(repo), Arc::new(unresolved));
        let (orgs, total) = svc.list(&request(), 1, 20).await.unwrap();
        assert!(orgs.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_create_requires_top_tier() {
        let mut repo = MockOrganizationRepository::new();
        repo.expect_create().times(0);

        let svc = OrganizationService::new(Arc::new(repo), resolver(Role::OrgAdmin, None));
        let result = svc.create(&request(), create_input("partner.example")).await;
        assert!(matches!(result, Err(AppError::AuthorizationDenied)));
    }

    #[tokio::test]
    async fn test_create_rejects_taken_domain() {
        let mut repo = MockOrganizationRepository::new();
        repo.expect_find_by_domain()
            .with(eq("partner.example"))
            .returning(|_| Ok(Some(Organization::default())));
        repo.expect_create().times(0);

        let svc = OrganizationService::new(Arc::new(repo), resolver(Role::SuperAdmin, None));
        let result = svc.create(&request(), create_input("Partner.Example")).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_update_keeps_own_domain() {
        let org = Organization {
            domain: Some("partner.example".to_string()),
            ..Default::default()
        };
        let found = org.clone();
        let by_domain = org.clone();
        let updated = org.clone();

        let mut repo = MockOrganizationRepository::new();
        repo.expect_find_by_id()
            .returning(move |_, _| Ok(Some(found.clone())));
        repo.expect_find_by_domain()
            .returning(move |_| Ok(Some(by_domain.clone())));
        repo.expect_update()
            .times(1)
            .returning(move |_, _| Ok(updated.clone()));

        let svc = OrganizationService::new(Arc::new(repo), resolver(Role::SuperAdmin, None));
        let input = UpdateOrganizationInput {
            domain: Some("partner.example".to_string()),
            ..Default::default()
        };
        assert!(svc.update(&request(), org.id, input).await.is_ok());
    }

    #[tokio::test]
    async fn test_org_admin_cannot_update_own_org() {
        let org = Organization::default();
        let found = org.clone();
        let mut repo = MockOrganizationRepository::new();
        repo.expect_find_by_id()
            .returning(move |_, _| Ok(Some(found.clone())));
        repo.expect_update().times(0);

        let svc = OrganizationService::new(Arc::new(repo), resolver(Role::OrgAdmin, Some(org.id)));
        let input = UpdateOrganizationInput {
            name: Some("Renamed".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            svc.update(&request(), org.id, input).await,
            Err(AppError::AuthorizationDenied)
        ));
    }

    #[tokio::test]
    async fn test_unresolved_delete_is_principal_unresolved() {
        let mut repo = MockOrganizationRepository::new();
        repo.expect_find_by_id().returning(|_, _| Ok(None));
        repo.expect_delete().times(0);

        let mut unresolved = MockPrincipalResolver::new();
        unresolved.expect_resolve().returning(|_| Ok(None));
        let svc = OrganizationService::new(Arc::new(repo), Arc::new(unresolved));
        assert!(matches!(
            svc.delete(&request(), StringUuid::new_v4()).await,
            Err(AppError::PrincipalUnresolved)
        ));
    }

    #[tokio::test]
    async fn test_top_tier_deletes() {
        let org = Organization::default();
        let found = org.clone();
        let mut repo = MockOrganizationRepository::new();
        repo.expect_find_by_id()
            .returning(move |_, _| Ok(Some(found.clone())));
        repo.expect_delete()
            .with(eq(org.id))
            .times(1)
            .returning(|_| Ok(()));

        let svc = OrganizationService::new(Arc::new(repo), resolver(Role::SuperAdmin, None));
        assert!(svc.delete(&request(), org.id).await.is_ok());
    }
}
