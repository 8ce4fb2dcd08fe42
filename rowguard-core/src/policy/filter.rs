//! Compiled row filters.
//!
//! A [`RowFilter`] is one rule for one actor with the actor's attributes
//! already substituted. Repositories append it to the `WHERE` clause: the
//! `Select` filter keeps unauthorized rows from leaving the store, and a
//! write filter guards the `UPDATE`/`DELETE` that performs the write.

use super::rules::{rule_for, Action, Condition, PolicyRule, ResourceType};
use crate::context::Actor;
use crate::domain::StringUuid;
use sqlx::{MySql, QueryBuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clause {
    /// Row (or its owner) is this identity
    OwnerIs(StringUuid),
    /// Owner belongs to this organization
    OwnerOrgIs(StringUuid),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowFilter {
    AllowAll,
    DenyAll,
    /// Non-empty OR of clauses
    AnyOf(Vec<Clause>),
}

/// Columns a filter is rendered against
#[derive(Debug, Clone, Copy)]
pub struct FilterColumns {
    /// Owning identity id; `None` for tables without an owner
    pub owner: Option<&'static str>,
    /// Owning organization id (possibly through a join)
    pub owner_org: &'static str,
}

impl RowFilter {
    /// Read filter for `actor` on `resource`.
    pub fn compile(actor: &Actor, resource: ResourceType) -> Self {
        Self::for_action(actor, resource, Action::Select)
    }

    /// Filter for `actor` performing `action` on `resource`.
    pub fn for_action(actor: &Actor, resource: ResourceType, action: Action) -> Self {
        Self::from_rule(actor, &rule_for(resource, action))
    }

    pub fn from_rule(actor: &Actor, rule: &PolicyRule) -> Self {
        let ctx = match actor {
            Actor::Service(_) if rule.has(Condition::ServiceBypass) => {
                return RowFilter::AllowAll
            }
            Actor::Identity(ctx) => ctx,
            _ => return RowFilter::DenyAll,
        };

        let mut clauses = Vec::with_capacity(rule.any_of.len());
        for condition in rule.any_of {
            match *condition {
                Condition::AnyResolved => return RowFilter::AllowAll,
                Condition::TopTier if ctx.role.is_top() => return RowFilter::AllowAll,
                Condition::Owner => clauses.push(Clause::OwnerIs(ctx.identity_id)),
                Condition::SameOrgAtLeast(minimum) if ctx.role.meets_threshold(minimum) => {
                    // An unaffiliated actor has no organization to match.
                    if let Some(org_id) = ctx.org_id {
                        clauses.push(Clause::OwnerOrgIs(org_id));
                    }
                }
                _ => {}
            }
        }

        if clauses.is_empty() {
            RowFilter::DenyAll
        } else {
            RowFilter::AnyOf(clauses)
        }
    }

    pub fn is_allow_all(&self) -> bool {
        matches!(self, RowFilter::AllowAll)
    }

    pub fn is_deny_all(&self) -> bool {
        matches!(self, RowFilter::DenyAll)
    }

    /// In-memory evaluation against a row's owner attributes.
    pub fn matches(&self, owner_id: Option<StringUuid>, owner_org_id: Option<StringUuid>) -> bool {
        match self {
            RowFilter::AllowAll => true,
            RowFilter::DenyAll => false,
            RowFilter::AnyOf(clauses) => clauses.iter().any(|clause| match clause {
                Clause::OwnerIs(id) => owner_id == Some(*id),
                Clause::OwnerOrgIs(org) => owner_org_id == Some(*org),
            }),
        }
    }

    /// Append the filter as a parenthesised boolean SQL expression.
    pub fn push_sql(&self, builder: &mut QueryBuilder<'_, MySql>, columns: &FilterColumns) {
        match self {
            RowFilter::AllowAll => {
                builder.push("1 = 1");
            }
            RowFilter::DenyAll => {
                builder.push("1 = 0");
            }
            RowFilter::AnyOf(clauses) => {
                builder.push("(");
                for (i, clause) in clauses.iter().enumerate() {
                    if i > 0 {
                        builder.push(" OR ");
                    }
                    match (clause, columns.owner) {
                        (Clause::OwnerIs(id), Some(column)) => {
                            builder.push(column).push(" = ").push_bind(*id);
                        }
                        (Clause::OwnerIs(_), None) => {
                            builder.push("1 = 0");
                        }
                        (Clause::OwnerOrgIs(org), _) => {
                            builder.push(columns.owner_org).push(" = ").push_bind(*org);
                        }
                    }
                }
                builder.push(")");
            }
        }
    }
}
