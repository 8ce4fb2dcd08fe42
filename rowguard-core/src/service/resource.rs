//! Protected resource business logic

use crate::context::{Actor, RequestContext};
use crate::domain::{
    CreateResourceInput, ProtectedResource, ResourceKind, StringUuid, UpdateResourceInput,
    WorkflowUpdateInput,
};
use crate::error::{AppError, Result};
use crate::policy::{self, Action, ResourceRef, ResourceType, RowFilter};
use crate::repository::{IdentityRepository, ResourceRepository};
use crate::resolver::PrincipalResolver;
use std::sync::Arc;
use validator::Validate;

pub struct ResourceService<R: ResourceRepository, IR: IdentityRepository> {
    repo: Arc<R>,
    identity_repo: Arc<IR>,
    resolver: Arc<dyn PrincipalResolver>,
}

impl<R: ResourceRepository, IR: IdentityRepository> ResourceService<R, IR> {
    pub fn new(repo: Arc<R>, identity_repo: Arc<IR>, resolver: Arc<dyn PrincipalResolver>) -> Self {
        Self {
            repo,
            identity_repo,
            resolver,
        }
    }

    pub async fn get(
        &self,
        ctx: &RequestContext,
        kind: ResourceKind,
        id: StringUuid,
    ) -> Result<ProtectedResource> {
        let actor = ctx.actor(self.resolver.as_ref()).await?;
        let filter = RowFilter::compile(actor, ResourceType::Protected(kind));
        self.repo
            .find_by_id(kind, id, &filter)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} {} not found", kind, id)))
    }

    pub async fn list(
        &self,
        ctx: &RequestContext,
        kind: ResourceKind,
        page: i64,
        per_page: i64,
    ) -> Result<(Vec<ProtectedResource>, i64)> {
        let actor = ctx.actor(self.resolver.as_ref()).await?;
        let filter = RowFilter::compile(actor, ResourceType::Protected(kind));
        let offset = super::page_offset(page, per_page)?;
        let rows = self.repo.list(kind, &filter, offset, per_page).await?;
        let total = self.repo.count(kind, &filter).await?;
        Ok((rows, total))
    }

    /// Create a row; the owner defaults to the caller.
    pub async fn create(
        &self,
        ctx: &RequestContext,
        kind: ResourceKind,
        input: CreateResourceInput,
    ) -> Result<ProtectedResource> {
        let actor = ctx.actor(self.resolver.as_ref()).await?;
        let owner_id = match (input.owner_id, actor) {
            (Some(owner_id), _) => owner_id,
            (None, Actor::Identity(me)) => me.identity_id,
            (None, Actor::Unresolved { .. }) => return Err(AppError::PrincipalUnresolved),
            (None, Actor::Service(_)) => {
                return Err(AppError::BadRequest("owner_id is required".to_string()))
            }
        };

        // The rule is evaluated before existence is reported, so a denied
        // caller learns nothing about the owner.
        let owner = self.identity_repo.membership_of(owner_id).await?;
        let target = ResourceRef::new_protected(kind, owner_id, owner.and_then(|o| o.org_id));
        policy::enforce(actor, &target, Action::Insert)?;
        if owner.is_none() {
            return Err(AppError::BadRequest("Owner identity does not exist".to_string()));
        }

        self.repo.create(kind, owner_id, &input.payload).await
    }

    pub async fn update(
        &self,
        ctx: &RequestContext,
        kind: ResourceKind,
        id: StringUuid,
        input: UpdateResourceInput,
    ) -> Result<ProtectedResource> {
        let actor = self.load_for_write(ctx, kind, id, Action::Update).await?;
        let guard = RowFilter::for_action(actor, ResourceType::Protected(kind), Action::Update);
        self.repo
            .update_payload(kind, id, &input.payload, &guard)
            .await?
            .ok_or_else(|| unavailable(actor, &guard, kind, id))
    }

    /// Write the verification-workflow fields only.
    pub async fn update_workflow(
        &self,
        ctx: &RequestContext,
        kind: ResourceKind,
        id: StringUuid,
        input: WorkflowUpdateInput,
    ) -> Result<ProtectedResource> {
        if !kind.supports_workflow() {
            return Err(AppError::BadRequest(format!(
                "{} has no workflow fields",
                kind
            )));
        }
        input.validate()?;

        let actor = self
            .load_for_write(ctx, kind, id, Action::UpdateWorkflow)
            .await?;
        let guard = RowFilter::for_action(
            actor,
            ResourceType::Protected(kind),
            Action::UpdateWorkflow,
        );
        let row = self
            .repo
            .update_workflow(kind, id, input.status, input.note, &guard)
            .await?
            .ok_or_else(|| unavailable(actor, &guard, kind, id))?;
        tracing::info!(
            resource = %kind,
            resource_id = %id,
            status = input.status.as_str(),
            "Workflow status changed"
        );
        Ok(row)
    }

    pub async fn delete(&self, ctx: &RequestContext, kind: ResourceKind, id: StringUuid) -> Result<()> {
        let actor = self.load_for_write(ctx, kind, id, Action::Delete).await?;
        let guard = RowFilter::for_action(actor, ResourceType::Protected(kind), Action::Delete);
        if !self.repo.delete(kind, id, &guard).await? {
            return Err(unavailable(actor, &guard, kind, id));
        }
        Ok(())
    }

    /// Check `action` against the row as the caller sees it.
    async fn load_for_write<'a>(
        &self,
        ctx: &'a RequestContext,
        kind: ResourceKind,
        id: StringUuid,
        action: Action,
    ) -> Result<&'a Actor> {
        let actor = ctx.actor(self.resolver.as_ref()).await?;
        let filter = RowFilter::compile(actor, ResourceType::Protected(kind));
        let Some(row) = self.repo.find_by_id(kind, id, &filter).await? else {
            return Err(unavailable(actor, &filter, kind, id));
        };
        policy::enforce(actor, &ResourceRef::protected(kind, &row), action)?;
        Ok(actor)
    }
}

fn unavailable(actor: &Actor, filter: &RowFilter, kind: ResourceKind, id: StringUuid) -> AppError {
    policy::unavailable(actor, filter, || {
        AppError::NotFound(format!("{} {} not found", kind, id))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{IdentityContext, ServiceGrant};
    use crate::domain::{OwnerRef, PrincipalId, Role, WorkflowStatus};
    use crate::repository::identity::MockIdentityRepository;
    use crate::repository::resource::MockResourceRepository;
    use crate::resolver::MockPrincipalResolver;
    use std::collections::HashMap;

    fn actor_resolver(ctx: IdentityContext) -> Arc<MockPrincipalResolver> {
        let mut resolver = MockPrincipalResolver::new();
        resolver.expect_resolve().returning(move |_| Ok(Some(ctx)));
        Arc::new(resolver)
    }

    fn request() -> RequestContext {
        RequestContext::for_principal(PrincipalId::new("kc-caller").unwrap())
    }

    fn caller(role: Role, org_id: Option<StringUuid>) -> IdentityContext {
        IdentityContext {
            identity_id: StringUuid::new_v4(),
            org_id,
            role,
        }
    }

    fn row(owner_id: StringUuid, owner_org_id: Option<StringUuid>) -> ProtectedResource {
        ProtectedResource {
            owner_id,
            owner_org_id,
            payload: serde_json::json!({"opaque": true}),
            workflow_status: Some(WorkflowStatus::Pending),
            ..Default::default()
        }
    }

    /// Applies the filter in memory and echoes writes back.
    fn repo_for(rows: Vec<ProtectedResource>) -> MockResourceRepository {
        let rows: HashMap<StringUuid, ProtectedResource> =
            rows.into_iter().map(|r| (r.id, r)).collect();
        let mut repo = MockResourceRepository::new();

        let by_id = rows.clone();
        repo.expect_find_by_id().returning(move |_, id, filter| {
            Ok(by_id
                .get(&id)
                .filter(|r| filter.matches(Some(r.owner_id), r.owner_org_id))
                .cloned())
        });

        let listing = rows.clone();
        repo.expect_list().returning(move |_, filter, _, _| {
            Ok(listing
                .values()
                .filter(|r| filter.matches(Some(r.owner_id), r.owner_org_id))
                .cloned()
                .collect())
        });

        let counting = rows.clone();
        repo.expect_count().returning(move |_, filter| {
            Ok(counting
                .values()
                .filter(|r| filter.matches(Some(r.owner_id), r.owner_org_id))
                .count() as i64)
        });

        expect_guarded_writes(&mut repo, &rows);
        repo
    }

    /// Guarded writes evaluated against the rows as they stand when the
    /// statement runs.
    fn expect_guarded_writes(
        repo: &mut MockResourceRepository,
        current: &HashMap<StringUuid, ProtectedResource>,
    ) {
        let workflow = current.clone();
        repo.expect_update_workflow()
            .returning(move |_, id, status, note, guard| {
                Ok(workflow
                    .get(&id)
                    .filter(|r| guard.matches(Some(r.owner_id), r.owner_org_id))
                    .map(|r| ProtectedResource {
                        workflow_status: Some(status),
                        workflow_note: note,
                        ..r.clone()
                    }))
            });

        let payloads = current.clone();
        repo.expect_update_payload()
            .returning(move |_, id, payload, guard| {
                Ok(payloads
                    .get(&id)
                    .filter(|r| guard.matches(Some(r.owner_id), r.owner_org_id))
                    .map(|r| ProtectedResource {
                        payload: payload.clone(),
                        ..r.clone()
                    }))
            });

        let deletable = current.clone();
        repo.expect_delete().returning(move |_, id, guard| {
            Ok(deletable
                .get(&id)
                .is_some_and(|r| guard.matches(Some(r.owner_id), r.owner_org_id)))
        });
    }

    fn service(
        repo: MockResourceRepository,
        identities: MockIdentityRepository,
        resolver: Arc<MockPrincipalResolver>,
    ) -> ResourceService<MockResourceRepository, MockIdentityRepository> {
        ResourceService::new(Arc::new(repo), Arc::new(identities), resolver)
    }

    #[tokio::test]
    async fn test_operator_reads_same_org_audit_rows_only() {
        let org_a = StringUuid::new_v4();
        let org_b = StringUuid::new_v4();
        let me = caller(Role::Operator, Some(org_a));
        let mine = row(me.identity_id, Some(org_a));
        let colleague = row(StringUuid::new_v4(), Some(org_a));
        let foreign = row(StringUuid::new_v4(), Some(org_b));
        let orphan = row(StringUuid::new_v4(), None);

        let svc = service(
            repo_for(vec![mine.clone(), colleague.clone(), foreign, orphan]),
            MockIdentityRepository::new(),
            actor_resolver(me),
        );
        let (rows, total) = svc
            .list(&request(), ResourceKind::SigningCertificate, 1, 50)
            .await
            .unwrap();
        let mut ids: Vec<_> = rows.iter().map(|r| r.id).collect();
        ids.sort();
        let mut expected = vec![mine.id, colleague.id];
        expected.sort();
        assert_eq!(ids, expected);
        assert_eq!(total, 2);
    }

    #[tokio::test]
    async fn test_citizen_reads_own_rows_only() {
        let org = StringUuid::new_v4();
        let me = caller(Role::Citizen, Some(org));
        let mine = row(me.identity_id, Some(org));
        let colleague = row(StringUuid::new_v4(), Some(org));

        let svc = service(
            repo_for(vec![mine.clone(), colleague.clone()]),
            MockIdentityRepository::new(),
            actor_resolver(me),
        );
        let (rows, _) = svc
            .list(&request(), ResourceKind::VerificationLog, 1, 50)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, mine.id);
        assert!(matches!(
            svc.get(&request(), ResourceKind::VerificationLog, colleague.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_org_admin_cannot_read_colleague_secrets() {
        let org = StringUuid::new_v4();
        let me = caller(Role::OrgAdmin, Some(org));
        let secret = row(StringUuid::new_v4(), Some(org));

        let svc = service(
            repo_for(vec![secret.clone()]),
            MockIdentityRepository::new(),
            actor_resolver(me),
        );
        assert!(matches!(
            svc.get(&request(), ResourceKind::OtpSecret, secret.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_top_tier_reads_but_cannot_rewrite_secrets() {
        let me = caller(Role::SuperAdmin, None);
        let secret = row(StringUuid::new_v4(), None);

        let svc = service(
            repo_for(vec![secret.clone()]),
            MockIdentityRepository::new(),
            actor_resolver(me),
        );
        assert!(svc
            .get(&request(), ResourceKind::RecoveryCodes, secret.id)
            .await
            .is_ok());
        let result = svc
            .update(
                &request(),
                ResourceKind::RecoveryCodes,
                secret.id,
                UpdateResourceInput {
                    payload: serde_json::json!({}),
                },
            )
            .await;
        assert!(matches!(result, Err(AppError::AuthorizationDenied)));
    }

    #[tokio::test]
    async fn test_operator_updates_workflow_in_same_org() {
        let org = StringUuid::new_v4();
        let me = caller(Role::Operator, Some(org));
        let record = row(StringUuid::new_v4(), Some(org));

        let svc = service(
            repo_for(vec![record.clone()]),
            MockIdentityRepository::new(),
            actor_resolver(me),
        );
        let updated = svc
            .update_workflow(
                &request(),
                ResourceKind::VerificationMetadata,
                record.id,
                WorkflowUpdateInput {
                    status: WorkflowStatus::Approved,
                    note: Some("documents checked".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.workflow_status, Some(WorkflowStatus::Approved));

        let payload_write = svc
            .update(
                &request(),
                ResourceKind::VerificationMetadata,
                record.id,
                UpdateResourceInput {
                    payload: serde_json::json!({"tampered": true}),
                },
            )
            .await;
        assert!(matches!(payload_write, Err(AppError::AuthorizationDenied)));
    }

    #[tokio::test]
    async fn test_operator_cannot_update_foreign_workflow() {
        let me = caller(Role::Operator, Some(StringUuid::new_v4()));
        let record = row(StringUuid::new_v4(), Some(StringUuid::new_v4()));

        let svc = service(
            repo_for(vec![record.clone()]),
            MockIdentityRepository::new(),
            actor_resolver(me),
        );
        let result = svc
            .update_workflow(
                &request(),
                ResourceKind::VerificationLog,
                record.id,
                WorkflowUpdateInput {
                    status: WorkflowStatus::Rejected,
                    note: None,
                },
            )
            .await;
        assert!(matches!(result, Err(AppError::AuthorizationDenied)));
    }

    #[tokio::test]
    async fn test_workflow_write_after_owner_left_org_is_denied() {
        let org = StringUuid::new_v4();
        let me = caller(Role::Operator, Some(org));
        let record = row(StringUuid::new_v4(), Some(org));

        // Visible to the operator at check time; the owner has moved to
        // another organization by the time the update runs.
        let mut repo = MockResourceRepository::new();
        let seen = record.clone();
        repo.expect_find_by_id().returning(move |_, _, filter| {
            Ok(filter
                .matches(Some(seen.owner_id), seen.owner_org_id)
                .then(|| seen.clone()))
        });
        let moved = ProtectedResource {
            owner_org_id: Some(StringUuid::new_v4()),
            ..record.clone()
        };
        expect_guarded_writes(&mut repo, &HashMap::from([(moved.id, moved)]));

        let svc = service(repo, MockIdentityRepository::new(), actor_resolver(me));
        let result = svc
            .update_workflow(
                &request(),
                ResourceKind::VerificationLog,
                record.id,
                WorkflowUpdateInput {
                    status: WorkflowStatus::Approved,
                    note: None,
                },
            )
            .await;
        assert!(matches!(result, Err(AppError::AuthorizationDenied)));
    }

    #[tokio::test]
    async fn test_owner_deletes_own_row() {
        let me = caller(Role::Citizen, None);
        let mine = row(me.identity_id, None);

        let svc = service(
            repo_for(vec![mine.clone()]),
            MockIdentityRepository::new(),
            actor_resolver(me),
        );
        assert!(svc
            .delete(&request(), ResourceKind::RecoveryCodes, mine.id)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_workflow_on_signing_kind_is_bad_request() {
        let me = caller(Role::SuperAdmin, None);
        let svc = service(
            MockResourceRepository::new(),
            MockIdentityRepository::new(),
            actor_resolver(me),
        );
        let result = svc
            .update_workflow(
                &request(),
                ResourceKind::SigningLog,
                StringUuid::new_v4(),
                WorkflowUpdateInput {
                    status: WorkflowStatus::Approved,
                    note: None,
                },
            )
            .await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_create_defaults_owner_to_caller() {
        let me = caller(Role::Citizen, None);
        let my_id = me.identity_id;

        let mut identities = MockIdentityRepository::new();
        identities
            .expect_membership_of()
            .returning(|id| Ok(Some(OwnerRef { id, org_id: None })));
        let mut repo = MockResourceRepository::new();
        repo.expect_create()
            .withf(move |_, owner, _| *owner == my_id)
            .times(1)
            .returning(|_, owner_id, payload| {
                Ok(ProtectedResource {
                    owner_id,
                    payload: payload.clone(),
                    ..Default::default()
                })
            });

        let svc = service(repo, identities, actor_resolver(me));
        let created = svc
            .create(
                &request(),
                ResourceKind::MfaSettings,
                CreateResourceInput {
                    owner_id: None,
                    payload: serde_json::json!({"totp": "enabled"}),
                },
            )
            .await
            .unwrap();
        assert_eq!(created.owner_id, my_id);
    }

    #[tokio::test]
    async fn test_create_for_someone_else_is_denied_before_existence_check() {
        let me = caller(Role::OrgAdmin, Some(StringUuid::new_v4()));
        let mut identities = MockIdentityRepository::new();
        identities.expect_membership_of().returning(|_| Ok(None));
        let mut repo = MockResourceRepository::new();
        repo.expect_create().times(0);

        let svc = service(repo, identities, actor_resolver(me));
        let result = svc
            .create(
                &request(),
                ResourceKind::SigningLog,
                CreateResourceInput {
                    owner_id: Some(StringUuid::new_v4()),
                    payload: serde_json::json!({}),
                },
            )
            .await;
        assert!(matches!(result, Err(AppError::AuthorizationDenied)));
    }

    #[tokio::test]
    async fn test_service_create_requires_owner() {
        let mut resolver = MockPrincipalResolver::new();
        resolver.expect_resolve().times(0);
        let svc = service(
            MockResourceRepository::new(),
            MockIdentityRepository::new(),
            Arc::new(resolver),
        );
        let ctx = RequestContext::for_service(ServiceGrant::issue("test"));
        let result = svc
            .create(
                &ctx,
                ResourceKind::SigningLog,
                CreateResourceInput {
                    owner_id: None,
                    payload: serde_json::json!({}),
                },
            )
            .await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }
}
