//! Identity resolver.
//!
//! This is the only code path that reads identity rows without a compiled
//! row filter. The identity rules themselves need the `(identity_id, org_id,
//! role)` triple, so evaluating them to produce it would recurse. Everything
//! here is read-only and returns the narrowest shape the caller needs.

use crate::context::IdentityContext;
use crate::domain::{PrincipalId, StringUuid};
use crate::error::Result;
use crate::repository::IdentityRepository;
use async_trait::async_trait;
use std::sync::Arc;

/// Principal → identity triple. `None` means not yet provisioned.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PrincipalResolver: Send + Sync {
    async fn resolve(&self, principal: &PrincipalId) -> Result<Option<IdentityContext>>;
}

/// Read-only surface for collaborators outside the policy layer (file
/// storage, notifications). Answers membership questions only; it never
/// returns profile data.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectoryView: Send + Sync {
    async fn identity_exists(&self, principal: &PrincipalId) -> Result<bool>;
    async fn organization_of(&self, identity_id: StringUuid) -> Result<Option<StringUuid>>;
}

pub struct IdentityResolver<R: IdentityRepository> {
    repo: Arc<R>,
}

impl<R: IdentityRepository> IdentityResolver<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }
}

impl<R: IdentityRepository> Clone for IdentityResolver<R> {
    fn clone(&self) -> Self {
        Self {
            repo: self.repo.clone(),
        }
    }
}

#[async_trait]
impl<R: IdentityRepository> PrincipalResolver for IdentityResolver<R> {
    async fn resolve(&self, principal: &PrincipalId) -> Result<Option<IdentityContext>> {
        let resolved = self.repo.resolve_principal(principal).await?;
        if resolved.is_none() {
            tracing::debug!(principal = %principal, "Principal not provisioned");
        }
        Ok(resolved)
    }
}

#[async_trait]
impl<R: IdentityRepository> DirectoryView for IdentityResolver<R> {
    async fn identity_exists(&self, principal: &PrincipalId) -> Result<bool> {
        Ok(self.repo.resolve_principal(principal).await?.is_some())
    }

    async fn organization_of(&self, identity_id: StringUuid) -> Result<Option<StringUuid>> {
        Ok(self
            .repo
            .membership_of(identity_id)
            .await?
            .and_then(|owner| owner.org_id))
    }
}
