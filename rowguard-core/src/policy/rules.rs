//! Static rule table.
//!
//! Exactly one rule exists per `(resource type, action)` pair, and every rule
//! is a flat OR over a fixed set of condition classes. Adding a condition to a
//! pair means editing its one rule, never stacking a second one.

use crate::domain::{ResourceClass, ResourceKind, Role};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Select,
    Insert,
    /// Field updates other than workflow state or assignment
    Update,
    /// Verification-workflow status and note
    UpdateWorkflow,
    /// Role / organization change on an identity
    Reassign,
    Delete,
}

impl Action {
    pub const ALL: [Action; 6] = [
        Action::Select,
        Action::Insert,
        Action::Update,
        Action::UpdateWorkflow,
        Action::Reassign,
        Action::Delete,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Action::Select => "select",
            Action::Insert => "insert",
            Action::Update => "update",
            Action::UpdateWorkflow => "update_workflow",
            Action::Reassign => "reassign",
            Action::Delete => "delete",
        }
    }

    pub const fn is_write(self) -> bool {
        !matches!(self, Action::Select)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a rule protects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Identity,
    Organization,
    Protected(ResourceKind),
}

impl ResourceType {
    pub fn all() -> impl Iterator<Item = ResourceType> {
        [ResourceType::Identity, ResourceType::Organization]
            .into_iter()
            .chain(ResourceKind::ALL.into_iter().map(ResourceType::Protected))
    }

    pub const fn table(self) -> &'static str {
        match self {
            ResourceType::Identity => "identities",
            ResourceType::Organization => "organizations",
            ResourceType::Protected(kind) => kind.table(),
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table())
    }
}

/// Condition classes a rule may OR together
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// Actor owns the row (or is the identity row itself)
    Owner,
    /// Actor shares the owner's organization and meets the tier
    SameOrgAtLeast(Role),
    /// Actor holds the top role tier
    TopTier,
    /// Internal job running with a service grant
    ServiceBypass,
    /// Any provisioned identity
    AnyResolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyRule {
    pub resource: ResourceType,
    pub action: Action,
    pub any_of: &'static [Condition],
}

impl PolicyRule {
    /// Stable rule name, e.g. `identities_update`.
    pub fn name(&self) -> String {
        format!("{}_{}", self.resource.table(), self.action.as_str())
    }

    pub fn has(&self, condition: Condition) -> bool {
        self.any_of.contains(&condition)
    }
}

use Condition::*;

const SELF_OR_ORG_ADMIN: &[Condition] = &[
    Owner,
    SameOrgAtLeast(Role::OrgAdmin),
    TopTier,
    ServiceBypass,
];
const ORG_ADMIN: &[Condition] = &[SameOrgAtLeast(Role::OrgAdmin), TopTier, ServiceBypass];
const TOP_TIER: &[Condition] = &[TopTier, ServiceBypass];
const ANY_RESOLVED: &[Condition] = &[AnyResolved, ServiceBypass];
const SELF_OR_TOP_TIER: &[Condition] = &[Owner, TopTier, ServiceBypass];
const SELF_ONLY: &[Condition] = &[Owner, ServiceBypass];
const SERVICE_ONLY: &[Condition] = &[ServiceBypass];
const SELF_OR_ORG_OPERATOR: &[Condition] = &[
    Owner,
    SameOrgAtLeast(Role::Operator),
    TopTier,
    ServiceBypass,
];
const ORG_OPERATOR: &[Condition] = &[SameOrgAtLeast(Role::Operator), TopTier, ServiceBypass];

/// The single rule governing `action` on `resource`.
pub fn rule_for(resource: ResourceType, action: Action) -> PolicyRule {
    let any_of = match resource {
        ResourceType::Identity => match action {
            Action::Select | Action::Update => SELF_OR_ORG_ADMIN,
            Action::Reassign => ORG_ADMIN,
            Action::Insert | Action::Delete | Action::UpdateWorkflow => TOP_TIER,
        },
        ResourceType::Organization => match action {
            Action::Select => ANY_RESOLVED,
            Action::Insert
            | Action::Update
            | Action::UpdateWorkflow
            | Action::Reassign
            | Action::Delete => TOP_TIER,
        },
        ResourceType::Protected(kind) => match (kind.class(), action) {
            (ResourceClass::PersonalSecurity, Action::Select) => SELF_OR_TOP_TIER,
            (
                ResourceClass::PersonalSecurity,
                Action::Insert | Action::Update | Action::Delete,
            ) => SELF_ONLY,
            (ResourceClass::PersonalSecurity, Action::UpdateWorkflow | Action::Reassign) => {
                SERVICE_ONLY
            }
            (ResourceClass::AuditRecord, Action::Select) => SELF_OR_ORG_OPERATOR,
            (ResourceClass::AuditRecord, Action::UpdateWorkflow) if kind.supports_workflow() => {
                ORG_OPERATOR
            }
            (
                ResourceClass::AuditRecord,
                Action::Insert
                | Action::Update
                | Action::UpdateWorkflow
                | Action::Reassign
                | Action::Delete,
            ) => TOP_TIER,
        },
    };

    PolicyRule {
        resource,
        action,
        any_of,
    }
}

/// Every rule in the table, one per pair.
pub fn all_rules() -> impl Iterator<Item = PolicyRule> {
    ResourceType::all().flat_map(|resource| {
        Action::ALL
            .into_iter()
            .map(move |action| rule_for(resource, action))
    })
}
