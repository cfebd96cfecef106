use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use warden_auth::WorkspaceRole;
use warden_core::{SessionId, UserId, WorkspaceId};

use super::{
    Membership, Repositories, Session, SessionRepository, Store, StoreError, User, UserRepository, Workspace,
    WorkspaceMember, WorkspaceRepository, WorkspaceWithRole,
};
use crate::filter::{Filter, MemberSort, SessionSort, WorkspaceSort};

// ─────────────────────────────────────────────────────────────────────────────
// Tables
// ─────────────────────────────────────────────────────────────────────────────

/// Prior state of one row, replayed newest-first to undo a transaction.
#[derive(Debug)]
enum Undo {
    User(UserId, Option<User>),
    Email(String, Option<UserId>),
    Session(SessionId, Option<Session>),
    SessionToken(String, Option<SessionId>),
    Workspace(WorkspaceId, Option<Workspace>),
    Membership((WorkspaceId, UserId), Option<Membership>),
}

fn put<K: Eq + Hash, V>(map: &mut HashMap<K, V>, key: K, row: Option<V>) -> Option<V> {
    match row {
        Some(row) => map.insert(key, row),
        None => map.remove(&key),
    }
}

/// Generates a row writer that records the previous row while a journal is open.
macro_rules! journaled {
    ($name:ident, $table:ident, $key:ty, $row:ty, $undo:ident) => {
        fn $name(&mut self, key: $key, row: Option<$row>) -> Option<$row> {
            let prev = put(&mut self.$table, key.clone(), row);
            if let Some(journal) = &mut self.journal {
                journal.push(Undo::$undo(key, prev.clone()));
            }
            prev
        }
    };
}

/// Row storage plus the unique indexes a relational schema would enforce.
///
/// Every mutating operation validates before it writes, so a failed call
/// leaves the tables untouched. Inside a transaction every write is also
/// journaled so the whole unit can be undone.
#[derive(Debug, Default)]
pub struct Tables {
    users: HashMap<UserId, User>,
    emails: HashMap<String, UserId>,
    sessions: HashMap<SessionId, Session>,
    session_tokens: HashMap<String, SessionId>,
    workspaces: HashMap<WorkspaceId, Workspace>,
    memberships: HashMap<(WorkspaceId, UserId), Membership>,
    journal: Option<Vec<Undo>>,
}

impl Tables {
    journaled!(put_user, users, UserId, User, User);
    journaled!(put_email, emails, String, UserId, Email);
    journaled!(put_session, sessions, SessionId, Session, Session);
    journaled!(put_session_token, session_tokens, String, SessionId, SessionToken);
    journaled!(put_workspace, workspaces, WorkspaceId, Workspace, Workspace);
    journaled!(put_membership, memberships, (WorkspaceId, UserId), Membership, Membership);

    fn begin(&mut self) {
        self.journal = Some(Vec::new());
    }

    fn commit(&mut self) {
        self.journal = None;
    }

    /// Undo every journaled write. No-op outside a transaction.
    fn rollback(&mut self) {
        let Some(journal) = self.journal.take() else {
            return;
        };
        for entry in journal.into_iter().rev() {
            match entry {
                Undo::User(k, v) => {
                    put(&mut self.users, k, v);
                }
                Undo::Email(k, v) => {
                    put(&mut self.emails, k, v);
                }
                Undo::Session(k, v) => {
                    put(&mut self.sessions, k, v);
                }
                Undo::SessionToken(k, v) => {
                    put(&mut self.session_tokens, k, v);
                }
                Undo::Workspace(k, v) => {
                    put(&mut self.workspaces, k, v);
                }
                Undo::Membership(k, v) => {
                    put(&mut self.memberships, k, v);
                }
            }
        }
    }

    fn insert_user(&mut self, user: &User) -> Result<(), StoreError> {
        if self.users.contains_key(&user.id) {
            return Err(StoreError::Backend(format!("duplicate user id {}", user.id)));
        }
        if let Some(email) = &user.email {
            if self.emails.contains_key(email) {
                return Err(StoreError::EmailTaken);
            }
            self.put_email(email.clone(), Some(user.id));
        }
        self.put_user(user.id, Some(user.clone()));
        Ok(())
    }

    fn user(&self, id: UserId) -> Result<User, StoreError> {
        self.users.get(&id).cloned().ok_or(StoreError::UserNotFound)
    }

    fn user_by_email(&self, email: &str) -> Result<User, StoreError> {
        let id = self.emails.get(email).ok_or(StoreError::UserNotFound)?;
        self.user(*id)
    }

    fn replace_user(&mut self, user: &User) -> Result<(), StoreError> {
        let previous_email = self
            .users
            .get(&user.id)
            .ok_or(StoreError::UserNotFound)?
            .email
            .clone();

        if previous_email != user.email {
            if let Some(email) = &user.email {
                if self.emails.get(email).is_some_and(|owner| *owner != user.id) {
                    return Err(StoreError::EmailTaken);
                }
            }
            if let Some(old) = previous_email {
                self.put_email(old, None);
            }
            if let Some(email) = &user.email {
                self.put_email(email.clone(), Some(user.id));
            }
        }
        self.put_user(user.id, Some(user.clone()));
        Ok(())
    }

    /// Workspaces where `id` is the only owner.
    fn solely_owned_by(&self, id: UserId) -> Vec<WorkspaceId> {
        self.memberships
            .values()
            .filter(|m| m.user_id == id && m.role == WorkspaceRole::Owner)
            .map(|m| m.workspace_id)
            .filter(|ws| {
                !self
                    .memberships
                    .values()
                    .any(|m| m.workspace_id == *ws && m.user_id != id && m.role == WorkspaceRole::Owner)
            })
            .collect()
    }

    /// Removes the user, their sessions and memberships, and every workspace
    /// they solely own (a workspace never outlives its last owner).
    fn remove_user(&mut self, id: UserId) -> Result<(), StoreError> {
        let user = self.user(id)?;
        for workspace_id in self.solely_owned_by(id) {
            self.remove_workspace(workspace_id)?;
        }
        if let Some(email) = user.email {
            self.put_email(email, None);
        }
        self.remove_sessions_where(|s| s.user_id == id);
        self.remove_memberships_where(|(_, member)| *member == id);
        self.put_user(id, None);
        Ok(())
    }

    fn insert_session(&mut self, session: &Session) -> Result<(), StoreError> {
        if self.sessions.contains_key(&session.id) || self.session_tokens.contains_key(&session.refresh_token) {
            return Err(StoreError::Backend(format!("duplicate session {}", session.id)));
        }
        if !self.users.contains_key(&session.user_id) {
            return Err(StoreError::UserNotFound);
        }
        self.put_session_token(session.refresh_token.clone(), Some(session.id));
        self.put_session(session.id, Some(session.clone()));
        Ok(())
    }

    fn session(&self, id: SessionId) -> Result<Session, StoreError> {
        self.sessions.get(&id).cloned().ok_or(StoreError::SessionNotFound)
    }

    fn session_by_token(&self, token: &str) -> Result<Session, StoreError> {
        let id = self.session_tokens.get(token).ok_or(StoreError::SessionNotFound)?;
        self.session(*id)
    }

    fn sessions_of(&self, user_id: UserId, filter: &Filter<SessionSort>) -> (Vec<Session>, u64) {
        let mut rows: Vec<Session> = self
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .filter(|s| filter.matches([s.ip_address.as_str(), s.user_agent.as_str()]))
            .cloned()
            .collect();

        rows.sort_by(|a, b| {
            let ord = match filter.sort_by {
                SessionSort::CreatedAt => a.created_at.cmp(&b.created_at),
                SessionSort::ExpiresAt => a.expires_at.cmp(&b.expires_at),
            };
            filter.order.apply(ord).then_with(|| a.id.cmp(&b.id))
        });

        let total = rows.len() as u64;
        (filter.window(rows), total)
    }

    fn remove_session(&mut self, id: SessionId) -> Result<(), StoreError> {
        if !self.sessions.contains_key(&id) {
            return Err(StoreError::SessionNotFound);
        }
        if let Some(session) = self.put_session(id, None) {
            self.put_session_token(session.refresh_token, None);
        }
        Ok(())
    }

    fn remove_session_by_token(&mut self, token: &str) -> Result<(), StoreError> {
        let id = *self.session_tokens.get(token).ok_or(StoreError::SessionNotFound)?;
        self.put_session_token(token.to_string(), None);
        self.put_session(id, None);
        Ok(())
    }

    fn remove_sessions_where(&mut self, mut pred: impl FnMut(&Session) -> bool) -> u64 {
        let doomed: Vec<SessionId> = self.sessions.values().filter(|s| pred(s)).map(|s| s.id).collect();
        for id in &doomed {
            if let Some(session) = self.put_session(*id, None) {
                self.put_session_token(session.refresh_token, None);
            }
        }
        doomed.len() as u64
    }

    fn insert_workspace(&mut self, workspace: &Workspace) -> Result<(), StoreError> {
        if self.workspaces.contains_key(&workspace.id) {
            return Err(StoreError::Backend(format!("duplicate workspace id {}", workspace.id)));
        }
        self.put_workspace(workspace.id, Some(workspace.clone()));
        Ok(())
    }

    fn workspace(&self, id: WorkspaceId) -> Result<Workspace, StoreError> {
        self.workspaces.get(&id).cloned().ok_or(StoreError::WorkspaceNotFound)
    }

    fn replace_workspace(&mut self, workspace: &Workspace) -> Result<(), StoreError> {
        if !self.workspaces.contains_key(&workspace.id) {
            return Err(StoreError::WorkspaceNotFound);
        }
        self.put_workspace(workspace.id, Some(workspace.clone()));
        Ok(())
    }

    fn remove_workspace(&mut self, id: WorkspaceId) -> Result<(), StoreError> {
        if !self.workspaces.contains_key(&id) {
            return Err(StoreError::WorkspaceNotFound);
        }
        self.put_workspace(id, None);
        self.remove_memberships_where(|(ws, _)| *ws == id);
        Ok(())
    }

    fn insert_membership(&mut self, membership: &Membership) -> Result<(), StoreError> {
        if !self.workspaces.contains_key(&membership.workspace_id) {
            return Err(StoreError::WorkspaceNotFound);
        }
        if !self.users.contains_key(&membership.user_id) {
            return Err(StoreError::UserNotFound);
        }
        let key = (membership.workspace_id, membership.user_id);
        if self.memberships.contains_key(&key) {
            return Err(StoreError::AlreadyMember);
        }
        self.put_membership(key, Some(*membership));
        Ok(())
    }

    fn remove_membership(&mut self, workspace_id: WorkspaceId, user_id: UserId) -> Result<(), StoreError> {
        let key = (workspace_id, user_id);
        if !self.memberships.contains_key(&key) {
            return Err(StoreError::NotMember);
        }
        self.put_membership(key, None);
        Ok(())
    }

    fn remove_memberships_where(&mut self, mut pred: impl FnMut(&(WorkspaceId, UserId)) -> bool) {
        let doomed: Vec<(WorkspaceId, UserId)> = self.memberships.keys().filter(|k| pred(k)).copied().collect();
        for key in doomed {
            self.put_membership(key, None);
        }
    }

    fn role(&self, workspace_id: WorkspaceId, user_id: UserId) -> Result<WorkspaceRole, StoreError> {
        self.memberships
            .get(&(workspace_id, user_id))
            .map(|m| m.role)
            .ok_or(StoreError::NotMember)
    }

    fn members_of(&self, workspace_id: WorkspaceId, filter: &Filter<MemberSort>) -> (Vec<WorkspaceMember>, u64) {
        let mut rows: Vec<WorkspaceMember> = self
            .memberships
            .values()
            .filter(|m| m.workspace_id == workspace_id)
            .filter_map(|m| {
                let user = self.users.get(&m.user_id)?;
                Some(WorkspaceMember {
                    workspace_id: m.workspace_id,
                    user_id: m.user_id,
                    role: m.role,
                    joined_at: m.joined_at,
                    name: user.name.clone(),
                    email: user.email.clone(),
                    avatar_url: user.avatar_url.clone(),
                })
            })
            .filter(|m| filter.matches([m.name.as_str(), m.email.as_deref().unwrap_or(""), m.role.as_str()]))
            .collect();

        rows.sort_by(|a, b| {
            let ord = match filter.sort_by {
                MemberSort::JoinedAt => a.joined_at.cmp(&b.joined_at),
                MemberSort::Name => a.name.cmp(&b.name),
                MemberSort::Email => a.email.cmp(&b.email),
                MemberSort::Role => a.role.as_str().cmp(b.role.as_str()),
            };
            filter.order.apply(ord).then_with(|| a.user_id.cmp(&b.user_id))
        });

        let total = rows.len() as u64;
        (filter.window(rows), total)
    }

    fn workspaces_of(&self, user_id: UserId, filter: &Filter<WorkspaceSort>) -> (Vec<WorkspaceWithRole>, u64) {
        let mut rows: Vec<WorkspaceWithRole> = self
            .memberships
            .values()
            .filter(|m| m.user_id == user_id)
            .filter_map(|m| {
                let workspace = self.workspaces.get(&m.workspace_id)?.clone();
                Some(WorkspaceWithRole { workspace, role: m.role })
            })
            .filter(|w| filter.matches([w.workspace.name.as_str(), w.role.as_str()]))
            .collect();

        rows.sort_by(|a, b| {
            let ord: Ordering = match filter.sort_by {
                WorkspaceSort::CreatedAt => a.workspace.created_at.cmp(&b.workspace.created_at),
                WorkspaceSort::UpdatedAt => a.workspace.updated_at.cmp(&b.workspace.updated_at),
                WorkspaceSort::Name => a.workspace.name.cmp(&b.workspace.name),
                WorkspaceSort::Role => a.role.as_str().cmp(b.role.as_str()),
            };
            filter.order.apply(ord).then_with(|| a.workspace.id.cmp(&b.workspace.id))
        });

        let total = rows.len() as u64;
        (filter.window(rows), total)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Table access (shared by the store and its transaction views)
// ─────────────────────────────────────────────────────────────────────────────

/// Scoped read/write access to a [`Tables`] instance.
pub trait TableAccess {
    fn read_tables<R>(&self, f: impl FnOnce(&Tables) -> Result<R, StoreError>) -> Result<R, StoreError>;

    fn write_tables<R>(&self, f: impl FnOnce(&mut Tables) -> Result<R, StoreError>) -> Result<R, StoreError>;
}

impl<C: TableAccess> UserRepository for C {
    fn create_user(&self, user: &User) -> Result<(), StoreError> {
        self.write_tables(|t| t.insert_user(user))
    }

    fn get_user(&self, id: UserId) -> Result<User, StoreError> {
        self.read_tables(|t| t.user(id))
    }

    fn get_user_by_email(&self, email: &str) -> Result<User, StoreError> {
        self.read_tables(|t| t.user_by_email(email))
    }

    fn email_exists(&self, email: &str) -> Result<bool, StoreError> {
        self.read_tables(|t| Ok(t.emails.contains_key(email)))
    }

    fn update_user(&self, user: &User) -> Result<(), StoreError> {
        self.write_tables(|t| t.replace_user(user))
    }

    fn delete_user(&self, id: UserId) -> Result<(), StoreError> {
        self.write_tables(|t| t.remove_user(id))
    }
}

impl<C: TableAccess> SessionRepository for C {
    fn create_session(&self, session: &Session) -> Result<(), StoreError> {
        self.write_tables(|t| t.insert_session(session))
    }

    fn get_session(&self, id: SessionId) -> Result<Session, StoreError> {
        self.read_tables(|t| t.session(id))
    }

    fn get_session_by_token(&self, refresh_token: &str) -> Result<Session, StoreError> {
        self.read_tables(|t| t.session_by_token(refresh_token))
    }

    fn list_sessions(&self, user_id: UserId, filter: &Filter<SessionSort>) -> Result<(Vec<Session>, u64), StoreError> {
        self.read_tables(|t| Ok(t.sessions_of(user_id, filter)))
    }

    fn count_sessions(&self, user_id: UserId) -> Result<u64, StoreError> {
        self.read_tables(|t| Ok(t.sessions.values().filter(|s| s.user_id == user_id).count() as u64))
    }

    fn delete_session(&self, id: SessionId) -> Result<(), StoreError> {
        self.write_tables(|t| t.remove_session(id))
    }

    fn delete_session_by_token(&self, refresh_token: &str) -> Result<(), StoreError> {
        self.write_tables(|t| t.remove_session_by_token(refresh_token))
    }

    fn delete_sessions_by_user(&self, user_id: UserId) -> Result<u64, StoreError> {
        self.write_tables(|t| Ok(t.remove_sessions_where(|s| s.user_id == user_id)))
    }

    fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.write_tables(|t| Ok(t.remove_sessions_where(|s| s.expires_at < now)))
    }
}

impl<C: TableAccess> WorkspaceRepository for C {
    fn create_workspace(&self, workspace: &Workspace) -> Result<(), StoreError> {
        self.write_tables(|t| t.insert_workspace(workspace))
    }

    fn get_workspace(&self, id: WorkspaceId) -> Result<Workspace, StoreError> {
        self.read_tables(|t| t.workspace(id))
    }

    fn update_workspace(&self, workspace: &Workspace) -> Result<(), StoreError> {
        self.write_tables(|t| t.replace_workspace(workspace))
    }

    fn delete_workspace(&self, id: WorkspaceId) -> Result<(), StoreError> {
        self.write_tables(|t| t.remove_workspace(id))
    }

    fn add_membership(&self, membership: &Membership) -> Result<(), StoreError> {
        self.write_tables(|t| t.insert_membership(membership))
    }

    fn remove_membership(&self, workspace_id: WorkspaceId, user_id: UserId) -> Result<(), StoreError> {
        self.write_tables(|t| t.remove_membership(workspace_id, user_id))
    }

    fn member_role(&self, workspace_id: WorkspaceId, user_id: UserId) -> Result<WorkspaceRole, StoreError> {
        self.read_tables(|t| t.role(workspace_id, user_id))
    }

    fn list_members(
        &self,
        workspace_id: WorkspaceId,
        filter: &Filter<MemberSort>,
    ) -> Result<(Vec<WorkspaceMember>, u64), StoreError> {
        self.read_tables(|t| Ok(t.members_of(workspace_id, filter)))
    }

    fn list_user_workspaces(
        &self,
        user_id: UserId,
        filter: &Filter<WorkspaceSort>,
    ) -> Result<(Vec<WorkspaceWithRole>, u64), StoreError> {
        self.read_tables(|t| Ok(t.workspaces_of(user_id, filter)))
    }

    fn count_user_workspaces(&self, user_id: UserId) -> Result<u64, StoreError> {
        self.read_tables(|t| Ok(t.memberships.keys().filter(|(_, u)| *u == user_id).count() as u64))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory transactional store.
///
/// Intended for tests/dev. A transaction holds the write lock, writes straight
/// into the tables and journals the rows it replaces; on error (or panic) the
/// journal is replayed backwards. Concurrent transactions are serialised and a
/// failed one leaves no trace.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with a backend error (fault injection).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, AtomicOrdering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(AtomicOrdering::SeqCst) {
            return Err(StoreError::Backend("store unavailable".to_string()));
        }
        Ok(())
    }
}

impl TableAccess for InMemoryStore {
    fn read_tables<R>(&self, f: impl FnOnce(&Tables) -> Result<R, StoreError>) -> Result<R, StoreError> {
        self.ensure_available()?;
        f(&self.tables.read())
    }

    fn write_tables<R>(&self, f: impl FnOnce(&mut Tables) -> Result<R, StoreError>) -> Result<R, StoreError> {
        self.ensure_available()?;
        f(&mut self.tables.write())
    }
}

/// Journaled view of the locked tables handed to a transaction closure.
///
/// Dropping it before the journal is committed rolls the transaction back.
struct TxView<'a> {
    tables: RefCell<&'a mut Tables>,
}

impl TableAccess for TxView<'_> {
    fn read_tables<R>(&self, f: impl FnOnce(&Tables) -> Result<R, StoreError>) -> Result<R, StoreError> {
        f(&self.tables.borrow())
    }

    fn write_tables<R>(&self, f: impl FnOnce(&mut Tables) -> Result<R, StoreError>) -> Result<R, StoreError> {
        f(&mut self.tables.borrow_mut())
    }
}

impl Drop for TxView<'_> {
    fn drop(&mut self) {
        self.tables.get_mut().rollback();
    }
}

impl Store for InMemoryStore {
    fn exec_tx<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&dyn Repositories) -> Result<T, E>,
        E: From<StoreError>,
    {
        self.ensure_available()?;
        let mut committed = self.tables.write();
        committed.begin();
        let view = TxView {
            tables: RefCell::new(&mut *committed),
        };

        let out = f(&view)?;
        view.tables.borrow_mut().commit();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterParams;
    use chrono::Duration;

    fn user(email: &str) -> User {
        User::new(Some(email.to_string()), "$argon2id$stub".into(), "Test User".into(), Utc::now())
    }

    fn session_for(user_id: UserId, token: &str, expires_in: Duration) -> Session {
        let now = Utc::now();
        Session {
            id: SessionId::new(),
            user_id,
            refresh_token: token.to_string(),
            ip_address: "10.0.0.1".into(),
            user_agent: "Firefox".into(),
            expires_at: now + expires_in,
            created_at: now,
        }
    }

    fn workspace(name: &str) -> Workspace {
        let now = Utc::now();
        Workspace {
            id: WorkspaceId::new(),
            name: name.to_string(),
            avatar_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn member(ws: WorkspaceId, user: UserId, role: WorkspaceRole) -> Membership {
        Membership {
            workspace_id: ws,
            user_id: user,
            role,
            joined_at: Utc::now(),
        }
    }

    #[test]
    fn emails_are_unique() {
        let store = InMemoryStore::new();
        store.create_user(&user("a@example.com")).unwrap();
        assert_eq!(store.create_user(&user("a@example.com")), Err(StoreError::EmailTaken));
        assert!(store.email_exists("a@example.com").unwrap());
    }

    #[test]
    fn email_index_follows_updates() {
        let store = InMemoryStore::new();
        let mut a = user("a@example.com");
        let b = user("b@example.com");
        store.create_user(&a).unwrap();
        store.create_user(&b).unwrap();

        a.email = Some("b@example.com".into());
        assert_eq!(store.update_user(&a), Err(StoreError::EmailTaken));

        a.email = Some("c@example.com".into());
        store.update_user(&a).unwrap();
        assert!(!store.email_exists("a@example.com").unwrap());
        assert_eq!(store.get_user_by_email("c@example.com").unwrap().id, a.id);
    }

    #[test]
    fn session_deletion_succeeds_once() {
        let store = InMemoryStore::new();
        let u = user("a@example.com");
        store.create_user(&u).unwrap();
        let s = session_for(u.id, "tok-1", Duration::hours(1));
        store.create_session(&s).unwrap();

        assert_eq!(store.get_session_by_token("tok-1").unwrap().id, s.id);
        store.delete_session(s.id).unwrap();
        assert_eq!(store.delete_session(s.id), Err(StoreError::SessionNotFound));
        assert_eq!(store.get_session_by_token("tok-1"), Err(StoreError::SessionNotFound));
    }

    #[test]
    fn sweep_removes_only_expired_sessions() {
        let store = InMemoryStore::new();
        let u = user("a@example.com");
        store.create_user(&u).unwrap();
        store.create_session(&session_for(u.id, "old", Duration::seconds(-5))).unwrap();
        store.create_session(&session_for(u.id, "live", Duration::hours(1))).unwrap();

        assert_eq!(store.delete_expired_sessions(Utc::now()).unwrap(), 1);
        assert_eq!(store.count_sessions(u.id).unwrap(), 1);
        assert!(store.get_session_by_token("live").is_ok());
    }

    #[test]
    fn deleting_a_user_cascades() {
        let store = InMemoryStore::new();
        let u = user("a@example.com");
        let ws = workspace("Acme");
        store.create_user(&u).unwrap();
        store.create_workspace(&ws).unwrap();
        store.add_membership(&member(ws.id, u.id, WorkspaceRole::Owner)).unwrap();
        store.create_session(&session_for(u.id, "t", Duration::hours(1))).unwrap();

        store.delete_user(u.id).unwrap();
        assert_eq!(store.count_sessions(u.id).unwrap(), 0);
        assert_eq!(store.member_role(ws.id, u.id), Err(StoreError::NotMember));
        assert!(!store.email_exists("a@example.com").unwrap());
    }

    #[test]
    fn deleting_the_owner_takes_their_workspaces_along() {
        let store = InMemoryStore::new();
        let owner = user("owner@example.com");
        let guest = user("guest@example.com");
        let ws = workspace("Acme");
        let elsewhere = workspace("Elsewhere");
        store.create_user(&owner).unwrap();
        store.create_user(&guest).unwrap();
        store.create_workspace(&ws).unwrap();
        store.create_workspace(&elsewhere).unwrap();
        store.add_membership(&member(ws.id, owner.id, WorkspaceRole::Owner)).unwrap();
        store.add_membership(&member(ws.id, guest.id, WorkspaceRole::Member)).unwrap();
        store.add_membership(&member(elsewhere.id, guest.id, WorkspaceRole::Owner)).unwrap();
        store.add_membership(&member(elsewhere.id, owner.id, WorkspaceRole::Admin)).unwrap();

        store.delete_user(owner.id).unwrap();

        assert_eq!(store.get_workspace(ws.id), Err(StoreError::WorkspaceNotFound));
        assert_eq!(store.member_role(ws.id, guest.id), Err(StoreError::NotMember));
        assert_eq!(store.get_workspace(elsewhere.id).unwrap().name, "Elsewhere");
        assert_eq!(store.member_role(elsewhere.id, guest.id), Ok(WorkspaceRole::Owner));
        assert_eq!(store.member_role(elsewhere.id, owner.id), Err(StoreError::NotMember));
        assert_eq!(store.count_user_workspaces(guest.id).unwrap(), 1);
    }

    #[test]
    fn workspace_with_another_owner_survives() {
        let store = InMemoryStore::new();
        let a = user("a@example.com");
        let b = user("b@example.com");
        let ws = workspace("Shared");
        store.create_user(&a).unwrap();
        store.create_user(&b).unwrap();
        store.create_workspace(&ws).unwrap();
        store.add_membership(&member(ws.id, a.id, WorkspaceRole::Owner)).unwrap();
        store.add_membership(&member(ws.id, b.id, WorkspaceRole::Owner)).unwrap();

        store.delete_user(a.id).unwrap();
        assert_eq!(store.member_role(ws.id, b.id), Ok(WorkspaceRole::Owner));
    }

    #[test]
    fn deleting_a_workspace_drops_memberships() {
        let store = InMemoryStore::new();
        let u = user("a@example.com");
        let ws = workspace("Acme");
        store.create_user(&u).unwrap();
        store.create_workspace(&ws).unwrap();
        store.add_membership(&member(ws.id, u.id, WorkspaceRole::Owner)).unwrap();
        assert_eq!(
            store.add_membership(&member(ws.id, u.id, WorkspaceRole::Member)),
            Err(StoreError::AlreadyMember)
        );

        store.delete_workspace(ws.id).unwrap();
        assert_eq!(store.member_role(ws.id, u.id), Err(StoreError::NotMember));
        assert_eq!(store.count_user_workspaces(u.id).unwrap(), 0);
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let store = InMemoryStore::new();
        let u = user("a@example.com");

        let result: Result<(), StoreError> = store.exec_tx(|tx| {
            tx.create_user(&u)?;
            tx.create_session(&session_for(u.id, "t", Duration::hours(1)))?;
            Err(StoreError::Backend("boom".into()))
        });
        assert!(result.is_err());
        assert_eq!(store.get_user(u.id), Err(StoreError::UserNotFound));
        assert_eq!(store.get_session_by_token("t"), Err(StoreError::SessionNotFound));
    }

    #[test]
    fn rollback_restores_overwritten_and_deleted_rows() {
        let store = InMemoryStore::new();
        let mut u = user("a@example.com");
        let ws = workspace("Acme");
        store.create_user(&u).unwrap();
        store.create_workspace(&ws).unwrap();
        store.add_membership(&member(ws.id, u.id, WorkspaceRole::Owner)).unwrap();
        let s = session_for(u.id, "old", Duration::hours(1));
        store.create_session(&s).unwrap();

        let result: Result<(), StoreError> = store.exec_tx(|tx| {
            tx.delete_session(s.id)?;
            tx.create_session(&session_for(u.id, "new", Duration::hours(1)))?;
            u.email = Some("moved@example.com".into());
            tx.update_user(&u)?;
            tx.delete_workspace(ws.id)?;
            tx.delete_user(u.id)?;
            Err(StoreError::Backend("boom".into()))
        });
        assert!(result.is_err());

        assert_eq!(store.get_session_by_token("old").unwrap().id, s.id);
        assert_eq!(store.get_session_by_token("new"), Err(StoreError::SessionNotFound));
        assert_eq!(store.get_user_by_email("a@example.com").unwrap().id, u.id);
        assert!(!store.email_exists("moved@example.com").unwrap());
        assert_eq!(store.member_role(ws.id, u.id), Ok(WorkspaceRole::Owner));
        assert_eq!(store.count_sessions(u.id).unwrap(), 1);
    }

    #[test]
    fn panicking_transaction_rolls_back() {
        let store = InMemoryStore::new();
        let u = user("a@example.com");

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _: Result<(), StoreError> = store.exec_tx(|tx| {
                tx.create_user(&u)?;
                panic!("closure blew up");
            });
        }));
        assert!(outcome.is_err());
        assert_eq!(store.get_user(u.id), Err(StoreError::UserNotFound));
        assert!(!store.email_exists("a@example.com").unwrap());

        // The next transaction starts with a clean journal.
        store.exec_tx(|tx| tx.create_user(&u)).unwrap();
        assert!(store.get_user(u.id).is_ok());
    }

    #[test]
    fn committed_transaction_is_visible() {
        let store = InMemoryStore::new();
        let u = user("a@example.com");

        let id = store
            .exec_tx(|tx| {
                tx.create_user(&u)?;
                tx.get_user(u.id).map(|found| found.id)
            })
            .unwrap();
        assert_eq!(store.get_user(id).unwrap().email.as_deref(), Some("a@example.com"));
    }

    #[test]
    fn session_listing_filters_sorts_and_pages() {
        let store = InMemoryStore::new();
        let u = user("a@example.com");
        store.create_user(&u).unwrap();
        for (i, agent) in ["Firefox", "Chrome", "firefox mobile"].iter().enumerate() {
            let mut s = session_for(u.id, &format!("t{i}"), Duration::hours(i as i64 + 1));
            s.user_agent = agent.to_string();
            store.create_session(&s).unwrap();
        }

        let params = FilterParams {
            search: "FIREFOX".into(),
            sort_by: "expires_at".into(),
            order: "asc".into(),
            limit: 1,
            ..FilterParams::default()
        };
        let (rows, total) = store.list_sessions(u.id, &params.normalize()).unwrap();
        assert_eq!(total, 2);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].user_agent, "Firefox");
    }

    #[test]
    fn member_listing_joins_profiles() {
        let store = InMemoryStore::new();
        let owner = user("owner@example.com");
        let mut guest = user("guest@example.com");
        guest.name = "Guest".into();
        let ws = workspace("Acme");
        store.create_user(&owner).unwrap();
        store.create_user(&guest).unwrap();
        store.create_workspace(&ws).unwrap();
        store.add_membership(&member(ws.id, owner.id, WorkspaceRole::Owner)).unwrap();
        store.add_membership(&member(ws.id, guest.id, WorkspaceRole::Member)).unwrap();

        let params = FilterParams {
            search: "guest".into(),
            ..FilterParams::default()
        };
        let (rows, total) = store.list_members(ws.id, &params.normalize()).unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].name, "Guest");
        assert_eq!(rows[0].role, WorkspaceRole::Member);

        let (mine, _) = store.list_user_workspaces(guest.id, &Filter::default()).unwrap();
        assert_eq!(mine[0].workspace.id, ws.id);
        assert_eq!(mine[0].role, WorkspaceRole::Member);
    }

    #[test]
    fn unavailable_store_fails_every_call() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(store.get_user(UserId::new()), Err(StoreError::Backend(_))));
        let tx: Result<(), StoreError> = store.exec_tx(|_| Ok(()));
        assert!(tx.is_err());

        store.set_unavailable(false);
        assert_eq!(store.get_user(UserId::new()), Err(StoreError::UserNotFound));
    }
}
