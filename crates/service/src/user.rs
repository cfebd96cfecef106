//! Profile reads/updates and self-service session management.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use warden_core::{AuthError, AuthResult, SessionId, UserId};
use warden_infra::UserCache;
use warden_infra::filter::{FilterParams, Page, SessionSort};
use warden_infra::store::{Session, SessionRepository, Store, User, UserRepository};

use crate::events::{AuthEvent, AuthEventKind, EventPublisher, publish_best_effort};
use crate::validate;

/// Partial profile update; absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpdateProfileInput {
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

pub struct UserService<S> {
    store: Arc<S>,
    cache: Arc<dyn UserCache>,
    events: Arc<dyn EventPublisher>,
}

impl<S> core::fmt::Debug for UserService<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UserService").finish_non_exhaustive()
    }
}

impl<S: Store> UserService<S> {
    pub fn new(store: Arc<S>, cache: Arc<dyn UserCache>, events: Arc<dyn EventPublisher>) -> Self {
        Self { store, cache, events }
    }

    /// Read-through: cache first, store on a miss or a cache failure.
    pub fn get_user(&self, id: UserId) -> AuthResult<User> {
        match self.cache.get_user(id) {
            Ok(Some(user)) => return Ok(user),
            Ok(None) => debug!(user_id = %id, "user cache miss"),
            Err(err) => warn!(user_id = %id, error = %err, "user cache read failed"),
        }

        let user = self.store.get_user(id)?;
        self.refresh_cache(&user);
        Ok(user)
    }

    #[instrument(skip(self, input))]
    pub fn update_profile(&self, id: UserId, input: UpdateProfileInput) -> AuthResult<User> {
        let name = input.name.as_deref().map(validate::name).transpose()?;
        let email = input.email.as_deref().map(validate::email).transpose()?;
        let avatar_url = input.avatar_url.as_deref().map(validate::avatar_url).transpose()?;

        let mut user = self.store.get_user(id)?;

        if let Some(email) = email {
            if user.email.as_deref() != Some(email.as_str()) {
                if self.store.email_exists(&email)? {
                    return Err(AuthError::EmailExists);
                }
                user.email = Some(email);
            }
        }
        if let Some(name) = name {
            user.name = name;
        }
        if avatar_url.is_some() {
            user.avatar_url = avatar_url;
        }
        user.updated_at = Utc::now();

        self.store.update_user(&user)?;
        self.refresh_cache(&user);

        info!(user_id = %id, "profile updated");
        publish_best_effort(
            self.events.as_ref(),
            AuthEvent::new(
                AuthEventKind::UserUpdated,
                id,
                json!({ "email": user.email, "name": user.name }),
            ),
        );
        Ok(user)
    }

    pub fn list_sessions(&self, id: UserId, params: &FilterParams) -> AuthResult<Page<Session>> {
        let filter = params.normalize::<SessionSort>();
        let (rows, total) = self.store.list_sessions(id, &filter)?;
        Ok(Page::new(rows, total, &filter))
    }

    /// Revoke one of the caller's own sessions.
    #[instrument(skip(self))]
    pub fn revoke_session(&self, id: UserId, session_id: SessionId) -> AuthResult<()> {
        let session = self.store.get_session(session_id)?;
        if session.user_id != id {
            return Err(AuthError::Forbidden);
        }
        self.store.delete_session(session_id)?;
        info!(user_id = %id, session_id = %session_id, "session revoked");
        Ok(())
    }

    /// Revoke every session of the caller; returns how many were removed.
    #[instrument(skip(self))]
    pub fn revoke_all_sessions(&self, id: UserId) -> AuthResult<u64> {
        let removed = self.store.delete_sessions_by_user(id)?;
        info!(user_id = %id, removed, "all sessions revoked");
        Ok(removed)
    }

    fn refresh_cache(&self, user: &User) {
        if let Err(err) = self.cache.set_user(user) {
            warn!(user_id = %user.id, error = %err, "failed to cache user");
            if let Err(err) = self.cache.delete_user(user.id) {
                warn!(user_id = %user.id, error = %err, "failed to invalidate cached user");
            }
        }
    }
}
