//! Persistence seam for users, sessions, workspaces and memberships.
//!
//! The repository traits are object-safe so a transaction can hand its scoped
//! view to a closure as `&dyn Repositories`. A relational backend implements
//! the same traits over its connection and transaction handles.

mod memory;
mod models;

use chrono::{DateTime, Utc};
use thiserror::Error;

use warden_auth::WorkspaceRole;
use warden_core::{AuthError, SessionId, UserId, WorkspaceId};

use crate::filter::{Filter, MemberSort, SessionSort, WorkspaceSort};

pub use memory::{InMemoryStore, TableAccess, Tables};
pub use models::{Membership, Session, User, Workspace, WorkspaceMember, WorkspaceWithRole};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("user not found")]
    UserNotFound,

    #[error("session not found")]
    SessionNotFound,

    #[error("workspace not found")]
    WorkspaceNotFound,

    #[error("user is not a member")]
    NotMember,

    #[error("user is already a member")]
    AlreadyMember,

    #[error("email already taken")]
    EmailTaken,

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for AuthError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::UserNotFound => AuthError::UserNotFound,
            StoreError::SessionNotFound => AuthError::SessionNotFound,
            StoreError::WorkspaceNotFound => AuthError::WorkspaceNotFound,
            StoreError::NotMember => AuthError::NotMember,
            StoreError::AlreadyMember => AuthError::AlreadyMember,
            StoreError::EmailTaken => AuthError::EmailExists,
            StoreError::Backend(_) => AuthError::storage(value),
        }
    }
}

pub trait UserRepository {
    /// Insert a new user; `EmailTaken` if the email is already in use.
    fn create_user(&self, user: &User) -> Result<(), StoreError>;

    fn get_user(&self, id: UserId) -> Result<User, StoreError>;

    fn get_user_by_email(&self, email: &str) -> Result<User, StoreError>;

    fn email_exists(&self, email: &str) -> Result<bool, StoreError>;

    /// Overwrite a user's mutable fields.
    fn update_user(&self, user: &User) -> Result<(), StoreError>;

    /// Delete a user with their sessions, memberships and every workspace
    /// they solely own.
    fn delete_user(&self, id: UserId) -> Result<(), StoreError>;
}

pub trait SessionRepository {
    fn create_session(&self, session: &Session) -> Result<(), StoreError>;

    fn get_session(&self, id: SessionId) -> Result<Session, StoreError>;

    fn get_session_by_token(&self, refresh_token: &str) -> Result<Session, StoreError>;

    /// One page of a user's sessions plus the unpaged match count.
    fn list_sessions(&self, user_id: UserId, filter: &Filter<SessionSort>) -> Result<(Vec<Session>, u64), StoreError>;

    fn count_sessions(&self, user_id: UserId) -> Result<u64, StoreError>;

    /// `SessionNotFound` when no row was removed, which makes deletion the
    /// single-use gate during rotation.
    fn delete_session(&self, id: SessionId) -> Result<(), StoreError>;

    fn delete_session_by_token(&self, refresh_token: &str) -> Result<(), StoreError>;

    fn delete_sessions_by_user(&self, user_id: UserId) -> Result<u64, StoreError>;

    /// Remove every session with `expires_at < now`.
    fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

pub trait WorkspaceRepository {
    fn create_workspace(&self, workspace: &Workspace) -> Result<(), StoreError>;

    fn get_workspace(&self, id: WorkspaceId) -> Result<Workspace, StoreError>;

    fn update_workspace(&self, workspace: &Workspace) -> Result<(), StoreError>;

    /// Delete a workspace and all of its memberships.
    fn delete_workspace(&self, id: WorkspaceId) -> Result<(), StoreError>;

    fn add_membership(&self, membership: &Membership) -> Result<(), StoreError>;

    fn remove_membership(&self, workspace_id: WorkspaceId, user_id: UserId) -> Result<(), StoreError>;

    /// `NotMember` when the user holds no role in the workspace.
    fn member_role(&self, workspace_id: WorkspaceId, user_id: UserId) -> Result<WorkspaceRole, StoreError>;

    fn list_members(
        &self,
        workspace_id: WorkspaceId,
        filter: &Filter<MemberSort>,
    ) -> Result<(Vec<WorkspaceMember>, u64), StoreError>;

    fn list_user_workspaces(
        &self,
        user_id: UserId,
        filter: &Filter<WorkspaceSort>,
    ) -> Result<(Vec<WorkspaceWithRole>, u64), StoreError>;

    fn count_user_workspaces(&self, user_id: UserId) -> Result<u64, StoreError>;
}

/// Every repository, as seen inside or outside a transaction.
pub trait Repositories: UserRepository + SessionRepository + WorkspaceRepository {}

impl<T> Repositories for T where T: UserRepository + SessionRepository + WorkspaceRepository + ?Sized {}

/// Shared store with scoped transactions.
pub trait Store: Repositories + Send + Sync {
    /// Run `f` against a transactional view: commit if it returns `Ok`,
    /// roll back otherwise.
    ///
    /// `f` must use only the view it is given; calling back into the store
    /// from inside `f` may deadlock.
    fn exec_tx<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&dyn Repositories) -> Result<T, E>,
        E: From<StoreError>;
}
