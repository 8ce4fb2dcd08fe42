//! Identity business logic

use crate::context::{Actor, RequestContext};
use crate::domain::{CreateIdentityInput, Identity, ReassignInput, StringUuid, UpdateProfileInput};
use crate::error::{AppError, Result};
use crate::policy::{self, Action, ResourceRef, ResourceType, RowFilter};
use crate::repository::{IdentityRepository, ResourceRepository};
use crate::resolver::PrincipalResolver;
use std::sync::Arc;
use validator::Validate;

pub struct IdentityService<R: IdentityRepository, RR: ResourceRepository> {
    repo: Arc<R>,
    resource_repo: Arc<RR>,
    resolver: Arc<dyn PrincipalResolver>,
}

impl<R: IdentityRepository, RR: ResourceRepository> IdentityService<R, RR> {
    pub fn new(repo: Arc<R>, resource_repo: Arc<RR>, resolver: Arc<dyn PrincipalResolver>) -> Self {
        Self {
            repo,
            resource_repo,
            resolver,
        }
    }

    /// The caller's own identity row.
    pub async fn me(&self, ctx: &RequestContext) -> Result<Identity> {
        let actor = ctx.actor(self.resolver.as_ref()).await?;
        let identity_id = match actor {
            Actor::Identity(identity) => identity.identity_id,
            Actor::Unresolved { .. } => return Err(AppError::PrincipalUnresolved),
            Actor::Service(_) => {
                return Err(AppError::BadRequest(
                    "Service context has no identity".to_string(),
                ))
            }
        };
        self.get(ctx, identity_id).await
    }

    pub async fn get(&self, ctx: &RequestContext, id: StringUuid) -> Result<Identity> {
        let actor = ctx.actor(self.resolver.as_ref()).await?;
        let filter = RowFilter::compile(actor, ResourceType::Identity);
        self.repo
            .find_by_id(id, &filter)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Identity {} not found", id)))
    }

    /// Visible identities only; an unresolved caller gets an empty page.
    pub async fn list(
        &self,
        ctx: &RequestContext,
        page: i64,
        per_page: i64,
    ) -> Result<(Vec<Identity>, i64)> {
        let actor = ctx.actor(self.resolver.as_ref()).await?;
        let filter = RowFilter::compile(actor, ResourceType::Identity);
        let offset = super::page_offset(page, per_page)?;
        let identities = self.repo.list(&filter, offset, per_page).await?;
        let total = self.repo.count(&filter).await?;
        Ok((identities, total))
    }

    pub async fn create(&self, ctx: &RequestContext, input: CreateIdentityInput) -> Result<Identity> {
        input.validate()?;

        let actor = ctx.actor(self.resolver.as_ref()).await?;
        let target = ResourceRef {
            resource: ResourceType::Identity,
            owner_id: None,
            owner_org_id: input.org_id,
        };
        policy::enforce(actor, &target, Action::Insert)?;

        match self.repo.create(&input).await {
            Err(AppError::ProvisioningConflict) => Err(AppError::Conflict(
                "Principal already has an identity".to_string(),
            )),
            other => other,
        }
    }

    pub async fn update_profile(
        &self,
        ctx: &RequestContext,
        id: StringUuid,
        input: UpdateProfileInput,
    ) -> Result<Identity> {
        input.validate()?;

        let actor = ctx.actor(self.resolver.as_ref()).await?;
        self.load_for_write(actor, id, Action::Update).await?;

        let guard = RowFilter::for_action(actor, ResourceType::Identity, Action::Update);
        self.repo
            .update_profile(id, &input, &guard)
            .await?
            .ok_or_else(|| Self::unavailable(actor, &guard, id))
    }

    /// Change role and organization.
    ///
    /// Below the top tier an actor cannot grant a role above its own, touch an
    /// identity that outranks it, or move an identity between organizations.
    pub async fn reassign(
        &self,
        ctx: &RequestContext,
        id: StringUuid,
        input: ReassignInput,
    ) -> Result<Identity> {
        let actor = ctx.actor(self.resolver.as_ref()).await?;
        let target = self.load_for_write(actor, id, Action::Reassign).await?;

        if let Actor::Identity(me) = actor {
            if !me.role.is_top()
                && (input.role > me.role || target.role > me.role || input.org_id != target.org_id)
            {
                tracing::debug!(identity_id = %id, "Reassignment exceeds actor tier");
                return Err(AppError::AuthorizationDenied);
            }
        }

        // A role change since the checks above fails the write.
        let guard = RowFilter::for_action(actor, ResourceType::Identity, Action::Reassign);
        let updated = self
            .repo
            .reassign(id, target.role, input.role, input.org_id, &guard)
            .await?
            .ok_or_else(|| Self::unavailable(actor, &guard, id))?;
        tracing::info!(
            identity_id = %id,
            role = %updated.role,
            org_id = ?updated.org_id,
            "Identity reassigned"
        );
        Ok(updated)
    }

    /// Rejected while the identity owns protected resources.
    pub async fn delete(&self, ctx: &RequestContext, id: StringUuid) -> Result<()> {
        let actor = ctx.actor(self.resolver.as_ref()).await?;
        self.load_for_write(actor, id, Action::Delete).await?;

        let owned = self.resource_repo.count_owned_by(id).await?;
        if owned > 0 {
            tracing::debug!(identity_id = %id, owned, "Identity still owns protected rows");
            return Err(AppError::OwnerConstraintViolation);
        }

        let guard = RowFilter::for_action(actor, ResourceType::Identity, Action::Delete);
        if !self.repo.delete(id, &guard).await? {
            return Err(Self::unavailable(actor, &guard, id));
        }
        Ok(())
    }

    /// Fetch the target through the caller's read filter, then gate the write.
    ///
    /// An invisible row is reported as not found only to callers that can
    /// see every row; everyone else gets the generic denial.
    async fn load_for_write(&self, actor: &Actor, id: StringUuid, action: Action) -> Result<Identity> {
        let filter = RowFilter::compile(actor, ResourceType::Identity);
        let Some(target) = self.repo.find_by_id(id, &filter).await? else {
            return Err(Self::unavailable(actor, &filter, id));
        };
        policy::enforce(actor, &ResourceRef::identity(&target), action)?;
        Ok(target)
    }

    fn unavailable(actor: &Actor, filter: &RowFilter, id: StringUuid) -> AppError {
        policy::unavailable(actor, filter, || {
            AppError::NotFound(format!("Identity {} not found", id))
        })
    }
}
