//! Workspace lifecycle and membership, gated by the role policy.
//!
//! Callers without a membership see `Forbidden` on every gated operation;
//! only [`WorkspaceService::member_role`] reports `NotMember` directly.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument};

use warden_auth::{PolicyError, WorkspaceOperation, WorkspaceRole, authorize, explain};
use warden_core::{AuthError, AuthResult, UserId, WorkspaceId};
use warden_infra::filter::{FilterParams, MemberSort, Page, WorkspaceSort};
use warden_infra::store::{
    Membership, Store, StoreError, User, UserRepository, Workspace, WorkspaceMember, WorkspaceRepository,
    WorkspaceWithRole,
};

use crate::events::{AuthEvent, AuthEventKind, EventPublisher, publish_best_effort};
use crate::validate;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateWorkspaceInput {
    pub name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

pub struct WorkspaceService<S> {
    store: Arc<S>,
    events: Arc<dyn EventPublisher>,
}

impl<S> core::fmt::Debug for WorkspaceService<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkspaceService").finish_non_exhaustive()
    }
}

impl<S: Store> WorkspaceService<S> {
    pub fn new(store: Arc<S>, events: Arc<dyn EventPublisher>) -> Self {
        Self { store, events }
    }

    /// Create a workspace with `requester` as its owner, atomically.
    #[instrument(skip(self, input))]
    pub fn create(&self, requester: UserId, input: CreateWorkspaceInput) -> AuthResult<Workspace> {
        let name = validate::workspace_name(&input.name)?;
        let avatar_url = input.avatar_url.as_deref().map(validate::avatar_url).transpose()?;

        let now = Utc::now();
        let workspace = Workspace {
            id: WorkspaceId::new(),
            name,
            avatar_url,
            created_at: now,
            updated_at: now,
        };

        self.store.exec_tx(|tx| -> AuthResult<()> {
            tx.create_workspace(&workspace)?;
            tx.add_membership(&Membership {
                workspace_id: workspace.id,
                user_id: requester,
                role: WorkspaceRole::Owner,
                joined_at: now,
            })?;
            Ok(())
        })?;

        info!(workspace_id = %workspace.id, "workspace created");
        self.publish(
            AuthEventKind::WorkspaceCreated,
            requester,
            json!({ "workspace_id": workspace.id, "name": workspace.name }),
        );
        Ok(workspace)
    }

    pub fn get(&self, requester: UserId, workspace_id: WorkspaceId) -> AuthResult<Workspace> {
        self.gate(workspace_id, requester, WorkspaceOperation::Read)?;
        Ok(self.store.get_workspace(workspace_id)?)
    }

    /// Rename a workspace; owner or admin.
    #[instrument(skip(self, name))]
    pub fn update(&self, requester: UserId, workspace_id: WorkspaceId, name: &str) -> AuthResult<Workspace> {
        self.gate(workspace_id, requester, WorkspaceOperation::Update)?;
        let name = validate::workspace_name(name)?;
        self.modify(requester, workspace_id, |ws| ws.name = name)
    }

    /// Set or clear the avatar URL; owner or admin.
    #[instrument(skip(self, avatar_url))]
    pub fn update_avatar(
        &self,
        requester: UserId,
        workspace_id: WorkspaceId,
        avatar_url: Option<&str>,
    ) -> AuthResult<Workspace> {
        self.gate(workspace_id, requester, WorkspaceOperation::Update)?;
        let avatar_url = avatar_url.map(validate::avatar_url).transpose()?;
        self.modify(requester, workspace_id, |ws| ws.avatar_url = avatar_url)
    }

    /// Delete a workspace and every membership in it; owner only.
    #[instrument(skip(self))]
    pub fn delete(&self, requester: UserId, workspace_id: WorkspaceId) -> AuthResult<()> {
        self.gate(workspace_id, requester, WorkspaceOperation::Delete)?;
        self.store.delete_workspace(workspace_id)?;

        info!(workspace_id = %workspace_id, "workspace deleted");
        self.publish(
            AuthEventKind::WorkspaceDeleted,
            requester,
            json!({ "workspace_id": workspace_id }),
        );
        Ok(())
    }

    /// Grant `role` to an existing user.
    #[instrument(skip(self))]
    pub fn add_member(
        &self,
        requester: UserId,
        workspace_id: WorkspaceId,
        target: UserId,
        role: WorkspaceRole,
    ) -> AuthResult<WorkspaceMember> {
        self.gate(workspace_id, requester, WorkspaceOperation::AddMember { role })?;
        let user = self.store.get_user(target)?;
        self.insert_member(requester, workspace_id, user, role)
    }

    /// Like [`add_member`](Self::add_member), resolving the target by email.
    #[instrument(skip(self, email))]
    pub fn add_member_by_email(
        &self,
        requester: UserId,
        workspace_id: WorkspaceId,
        email: &str,
        role: WorkspaceRole,
    ) -> AuthResult<WorkspaceMember> {
        self.gate(workspace_id, requester, WorkspaceOperation::AddMember { role })?;
        let user = self.store.get_user_by_email(&validate::normalize_email(email))?;
        self.insert_member(requester, workspace_id, user, role)
    }

    /// Remove `target`, or leave when `target == requester`.
    #[instrument(skip(self))]
    pub fn remove_member(&self, requester: UserId, workspace_id: WorkspaceId, target: UserId) -> AuthResult<()> {
        let requester_role = self.role_of(workspace_id, requester)?;
        let is_self = requester == target;

        let target_role = match requester_role {
            Some(role) if is_self => role,
            // Members are refused before the target's membership is looked up.
            Some(WorkspaceRole::Member) | None => WorkspaceRole::Member,
            Some(_) => self.store.member_role(workspace_id, target)?,
        };
        self.permit(
            workspace_id,
            requester,
            requester_role,
            WorkspaceOperation::RemoveMember { is_self, target_role },
        )?;

        self.store.remove_membership(workspace_id, target)?;

        info!(workspace_id = %workspace_id, target = %target, left = is_self, "member removed");
        self.publish(
            AuthEventKind::MemberRemoved,
            requester,
            json!({ "workspace_id": workspace_id, "user_id": target, "role": target_role }),
        );
        Ok(())
    }

    pub fn list_members(
        &self,
        requester: UserId,
        workspace_id: WorkspaceId,
        params: &FilterParams,
    ) -> AuthResult<Page<WorkspaceMember>> {
        self.gate(workspace_id, requester, WorkspaceOperation::ListMembers)?;
        let filter = params.normalize::<MemberSort>();
        let (rows, total) = self.store.list_members(workspace_id, &filter)?;
        Ok(Page::new(rows, total, &filter))
    }

    /// Workspaces `requester` belongs to, with their role in each.
    pub fn list_my_workspaces(&self, requester: UserId, params: &FilterParams) -> AuthResult<Page<WorkspaceWithRole>> {
        let filter = params.normalize::<WorkspaceSort>();
        let (rows, total) = self.store.list_user_workspaces(requester, &filter)?;
        Ok(Page::new(rows, total, &filter))
    }

    /// Role of `user` in the workspace; `NotMember` without a membership.
    pub fn member_role(&self, workspace_id: WorkspaceId, user: UserId) -> AuthResult<WorkspaceRole> {
        Ok(self.store.member_role(workspace_id, user)?)
    }

    fn role_of(&self, workspace_id: WorkspaceId, user: UserId) -> AuthResult<Option<WorkspaceRole>> {
        match self.store.member_role(workspace_id, user) {
            Ok(role) => Ok(Some(role)),
            Err(StoreError::NotMember) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn gate(&self, workspace_id: WorkspaceId, requester: UserId, op: WorkspaceOperation) -> AuthResult<WorkspaceRole> {
        let role = self.role_of(workspace_id, requester)?;
        self.permit(workspace_id, requester, role, op)?;
        role.ok_or(AuthError::Forbidden)
    }

    fn permit(
        &self,
        workspace_id: WorkspaceId,
        requester: UserId,
        role: Option<WorkspaceRole>,
        op: WorkspaceOperation,
    ) -> AuthResult<()> {
        authorize(role, op).map_err(|denied| {
            let explanation = explain(role, op);
            debug!(
                workspace_id = %workspace_id,
                user_id = %requester,
                operation = explanation.operation,
                reason = %explanation.reason,
                "workspace operation denied"
            );
            match denied {
                PolicyError::NotMember => AuthError::Forbidden,
                other => other.into(),
            }
        })
    }

    fn modify(
        &self,
        requester: UserId,
        workspace_id: WorkspaceId,
        change: impl FnOnce(&mut Workspace),
    ) -> AuthResult<Workspace> {
        let workspace = self.store.exec_tx(|tx| -> AuthResult<Workspace> {
            let mut workspace = tx.get_workspace(workspace_id)?;
            change(&mut workspace);
            workspace.updated_at = Utc::now();
            tx.update_workspace(&workspace)?;
            Ok(workspace)
        })?;

        info!(workspace_id = %workspace_id, "workspace updated");
        self.publish(
            AuthEventKind::WorkspaceUpdated,
            requester,
            json!({ "workspace_id": workspace_id, "name": workspace.name }),
        );
        Ok(workspace)
    }

    fn insert_member(
        &self,
        requester: UserId,
        workspace_id: WorkspaceId,
        user: User,
        role: WorkspaceRole,
    ) -> AuthResult<WorkspaceMember> {
        let membership = Membership {
            workspace_id,
            user_id: user.id,
            role,
            joined_at: Utc::now(),
        };
        self.store.add_membership(&membership)?;

        info!(workspace_id = %workspace_id, member = %user.id, role = %role, "member added");
        self.publish(
            AuthEventKind::MemberAdded,
            requester,
            json!({ "workspace_id": workspace_id, "user_id": user.id, "role": role }),
        );

        Ok(WorkspaceMember {
            workspace_id,
            user_id: user.id,
            role,
            joined_at: membership.joined_at,
            name: user.name,
            email: user.email,
            avatar_url: user.avatar_url,
        })
    }

    fn publish(&self, kind: AuthEventKind, actor: UserId, payload: serde_json::Value) {
        publish_best_effort(self.events.as_ref(), AuthEvent::new(kind, actor, payload));
    }
}
