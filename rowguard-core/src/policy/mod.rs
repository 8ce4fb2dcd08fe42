//! Row-level authorization policy.
//!
//! Reads compile the `Select` rule into a [`RowFilter`] that is pushed into
//! the query. Writes call [`enforce`] against the loaded target row, and the
//! mutating statement carries the same rule compiled as a guard, so a row
//! that stops satisfying it in between is left untouched.

pub mod filter;
pub mod rules;

pub use filter::{Clause, FilterColumns, RowFilter};
pub use rules::{all_rules, rule_for, Action, Condition, PolicyRule, ResourceType};

use crate::context::{Actor, IdentityContext};
use crate::domain::{Identity, Organization, ProtectedResource, ResourceKind, StringUuid};
use crate::error::{AppError, Result};

/// The row a decision is about, reduced to what rules inspect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceRef {
    pub resource: ResourceType,
    /// Owning identity; for identity rows, the row's own id
    pub owner_id: Option<StringUuid>,
    /// Organization of the owner; for organization rows, the row's own id
    pub owner_org_id: Option<StringUuid>,
}

impl ResourceRef {
    pub fn identity(identity: &Identity) -> Self {
        Self {
            resource: ResourceType::Identity,
            owner_id: Some(identity.id),
            owner_org_id: identity.org_id,
        }
    }

    pub fn organization(org_id: Option<StringUuid>) -> Self {
        Self {
            resource: ResourceType::Organization,
            owner_id: None,
            owner_org_id: org_id,
        }
    }

    pub fn protected(kind: ResourceKind, row: &ProtectedResource) -> Self {
        Self::new_protected(kind, row.owner_id, row.owner_org_id)
    }

    /// A protected row that does not exist yet
    pub fn new_protected(
        kind: ResourceKind,
        owner_id: StringUuid,
        owner_org_id: Option<StringUuid>,
    ) -> Self {
        Self {
            resource: ResourceType::Protected(kind),
            owner_id: Some(owner_id),
            owner_org_id,
        }
    }
}

impl From<&Organization> for ResourceRef {
    fn from(org: &Organization) -> Self {
        ResourceRef::organization(Some(org.id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        self == Decision::Allow
    }
}

fn holds(condition: Condition, ctx: &IdentityContext, target: &ResourceRef) -> bool {
    match condition {
        Condition::Owner => target.owner_id == Some(ctx.identity_id),
        Condition::SameOrgAtLeast(minimum) => {
            ctx.role.meets_threshold(minimum)
                && ctx.org_id.is_some()
                && ctx.org_id == target.owner_org_id
        }
        Condition::TopTier => ctx.role.is_top(),
        Condition::AnyResolved => true,
        // Identities are never service actors.
        Condition::ServiceBypass => false,
    }
}

/// Evaluate the single rule for `(target.resource, action)`.
pub fn authorize(actor: &Actor, target: &ResourceRef, action: Action) -> Decision {
    let rule = rule_for(target.resource, action);
    let allowed = match actor {
        Actor::Service(_) => rule.has(Condition::ServiceBypass),
        Actor::Identity(ctx) => rule.any_of.iter().any(|c| holds(*c, ctx, target)),
        Actor::Unresolved { .. } => false,
    };
    if allowed {
        Decision::Allow
    } else {
        Decision::Deny
    }
}

/// Gate a write. The error never says which condition failed.
pub fn enforce(actor: &Actor, target: &ResourceRef, action: Action) -> Result<()> {
    match authorize(actor, target, action) {
        Decision::Allow => Ok(()),
        Decision::Deny => {
            tracing::debug!(
                resource = %target.resource,
                action = %action,
                "Write denied by policy"
            );
            Err(denial(actor))
        }
    }
}

/// Rejection kind for an actor that failed a rule.
pub fn denial(actor: &Actor) -> AppError {
    if actor.is_resolved() {
        AppError::AuthorizationDenied
    } else {
        AppError::PrincipalUnresolved
    }
}

/// Error for a write target the caller cannot reach.
///
/// Only callers whose filter admits every row learn that it does not exist.
pub fn unavailable(
    actor: &Actor,
    filter: &RowFilter,
    not_found: impl FnOnce() -> AppError,
) -> AppError {
    if filter.is_allow_all() {
        not_found()
    } else {
        denial(actor)
    }
}
