//! Request-scoped actor context.
//!
//! A [`RequestContext`] is created per request (or per background job) and
//! threaded explicitly through every service call. The resolved actor is
//! memoized inside the context, so one request resolves its principal at most
//! once and two requests never share a result.

use crate::domain::{PrincipalId, Role, StringUuid};
use crate::error::{AppError, Result};
use crate::resolver::PrincipalResolver;
use chrono::{DateTime, Utc};
use tokio::sync::OnceCell;

/// Resolved `(identity_id, org_id, role)` triple
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityContext {
    pub identity_id: StringUuid,
    pub org_id: Option<StringUuid>,
    pub role: Role,
}

/// Proof that the caller runs in service-bypass mode.
///
/// Fields are private; the only constructor is [`ServiceGrant::issue`], which
/// HTTP handlers never call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceGrant {
    job: &'static str,
    issued_at: DateTime<Utc>,
}

impl ServiceGrant {
    /// Grant service-bypass to a named internal job.
    pub fn issue(job: &'static str) -> Self {
        tracing::info!(job, "Service-bypass grant issued");
        Self {
            job,
            issued_at: Utc::now(),
        }
    }

    pub fn job(&self) -> &'static str {
        self.job
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }
}

/// Who is acting, as far as the policy layer is concerned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    /// Authenticated but not provisioned; every rule denies.
    Unresolved { principal: PrincipalId },
    Identity(IdentityContext),
    Service(ServiceGrant),
}

impl Actor {
    pub fn identity(&self) -> Option<&IdentityContext> {
        match self {
            Actor::Identity(ctx) => Some(ctx),
            _ => None,
        }
    }

    pub fn is_service(&self) -> bool {
        matches!(self, Actor::Service(_))
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, Actor::Unresolved { .. })
    }

    /// Role of a resolved identity
    pub fn role(&self) -> Option<Role> {
        self.identity().map(|ctx| ctx.role)
    }
}

enum ActorSource {
    Principal(PrincipalId),
    Service,
}

pub struct RequestContext {
    source: ActorSource,
    actor: OnceCell<Actor>,
}

impl RequestContext {
    /// Context for an authenticated principal; resolution is deferred until
    /// the first policy check.
    pub fn for_principal(principal: PrincipalId) -> Self {
        Self {
            source: ActorSource::Principal(principal),
            actor: OnceCell::new(),
        }
    }

    pub fn for_service(grant: ServiceGrant) -> Self {
        Self {
            source: ActorSource::Service,
            actor: OnceCell::new_with(Some(Actor::Service(grant))),
        }
    }

    /// Principal this context was created for, if any.
    pub fn principal(&self) -> Option<&PrincipalId> {
        match &self.source {
            ActorSource::Principal(principal) => Some(principal),
            ActorSource::Service => None,
        }
    }

    /// The acting party, resolved on first use and memoized afterwards.
    pub async fn actor<R>(&self, resolver: &R) -> Result<&Actor>
    where
        R: PrincipalResolver + ?Sized,
    {
        self.actor
            .get_or_try_init(|| async {
                let actor: Result<Actor> = match &self.source {
                    ActorSource::Principal(principal) => {
                        match resolver.resolve(principal).await {
                            Ok(Some(ctx)) => Ok(Actor::Identity(ctx)),
                            Ok(None) => Ok(Actor::Unresolved {
                                principal: principal.clone(),
                            }),
                            Err(e) => Err(e),
                        }
                    }
                    // Pre-filled at construction.
                    ActorSource::Service => Err(AppError::Internal(anyhow::anyhow!(
                        "service context constructed without a grant"
                    ))),
                };
                actor
            })
            .await
    }
}
