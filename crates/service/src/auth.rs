//! Registration, login, refresh-token rotation and logout.
//!
//! ```text
//! register ─┐
//!           ├─▶ tx { [create user] + create session } ─▶ (access, refresh)
//! login ────┘
//!
//! refresh:  verify ─▶ lookup by token ─▶ subject check ─▶ expiry check
//!           ─▶ tx { delete consumed session + create new session } ─▶ pair
//! ```
//!
//! The delete inside the rotation transaction only succeeds once per
//! session, so two concurrent refreshes with the same token cannot both
//! mint a new pair.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use warden_auth::{CredentialIssuer, CredentialPayload, IssuedToken, PasswordHasher};
use warden_core::{AuthError, AuthResult, ClientInfo, RequestContext, SessionId, UserId};
use warden_infra::UserCache;
use warden_infra::store::{Repositories, Session, SessionRepository, Store, StoreError, User, UserRepository};

use crate::events::{AuthEvent, AuthEventKind, EventPublisher, publish_best_effort};
use crate::validate;

#[derive(Clone, Default, Deserialize)]
pub struct RegisterInput {
    #[serde(default)]
    pub email: Option<String>,
    pub password: String,
    pub name: String,
}

impl core::fmt::Debug for RegisterInput {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RegisterInput")
            .field("email", &self.email)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Default, Deserialize)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

impl core::fmt::Debug for LoginInput {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LoginInput").field("email", &self.email).finish_non_exhaustive()
    }
}

/// Access + refresh credentials with their expiries in Unix seconds.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_token_expires_at: i64,
    pub refresh_token_expires_at: i64,
}

impl TokenPair {
    fn new(access: IssuedToken, refresh: IssuedToken) -> Self {
        Self {
            access_token_expires_at: access.payload.expires_at.timestamp(),
            refresh_token_expires_at: refresh.payload.expires_at.timestamp(),
            access_token: access.token,
            refresh_token: refresh.token,
        }
    }
}

impl core::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token_expires_at", &self.access_token_expires_at)
            .field("refresh_token_expires_at", &self.refresh_token_expires_at)
            .finish_non_exhaustive()
    }
}

/// Result of a successful register or login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthOutcome {
    pub user: User,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

/// Extract the credential from an `Authorization: Bearer <token>` header.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

pub struct AuthService<S> {
    store: Arc<S>,
    issuer: Arc<CredentialIssuer>,
    hasher: PasswordHasher,
    cache: Arc<dyn UserCache>,
    events: Arc<dyn EventPublisher>,
}

impl<S> core::fmt::Debug for AuthService<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuthService").finish_non_exhaustive()
    }
}

impl<S: Store> AuthService<S> {
    pub fn new(
        store: Arc<S>,
        issuer: Arc<CredentialIssuer>,
        hasher: PasswordHasher,
        cache: Arc<dyn UserCache>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            store,
            issuer,
            hasher,
            cache,
            events,
        }
    }

    /// Create a user and their first session in one transaction.
    #[instrument(skip(self, ctx, input, client), fields(ip = %client.ip))]
    pub fn register(&self, ctx: &RequestContext, input: RegisterInput, client: &ClientInfo) -> AuthResult<AuthOutcome> {
        ctx.check()?;

        let email = input.email.as_deref().map(validate::email).transpose()?;
        validate::password(&input.password)?;
        let name = validate::name(&input.name)?;

        if let Some(email) = &email {
            if self.store.email_exists(email)? {
                return Err(AuthError::EmailExists);
            }
        }

        ctx.check()?;
        let password_hash = self.hasher.hash(&input.password)?;

        let user = User::new(email, password_hash, name, Utc::now());
        let tokens = self.store.exec_tx(|tx| {
            tx.create_user(&user)?;
            self.open_session(tx, user.id, client)
        })?;

        self.cache_user(&user);
        info!(user_id = %user.id, "user registered");
        publish_best_effort(
            self.events.as_ref(),
            AuthEvent::new(
                AuthEventKind::UserRegistered,
                user.id,
                json!({ "email": user.email, "name": user.name, "ip": client.ip }),
            ),
        );

        Ok(AuthOutcome { user, tokens })
    }

    /// Check email + password and open a new session.
    ///
    /// An unknown email and a wrong password are indistinguishable.
    #[instrument(skip(self, ctx, input, client), fields(ip = %client.ip))]
    pub fn login(&self, ctx: &RequestContext, input: LoginInput, client: &ClientInfo) -> AuthResult<AuthOutcome> {
        ctx.check()?;

        let email = validate::email(&input.email)?;
        if input.password.chars().count() > validate::PASSWORD_MAX {
            return Err(AuthError::validation("password is too long"));
        }

        let user = match self.store.get_user_by_email(&email) {
            Ok(user) => user,
            Err(StoreError::UserNotFound) => {
                debug!("login for unknown email");
                return Err(AuthError::InvalidCredentials);
            }
            Err(err) => return Err(err.into()),
        };

        ctx.check()?;
        if !self.hasher.verify(&input.password, &user.password_hash) {
            debug!(user_id = %user.id, "login with wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        self.cache_user(&user);
        let tokens = self.store.exec_tx(|tx| self.open_session(tx, user.id, client))?;

        info!(user_id = %user.id, "user logged in");
        publish_best_effort(
            self.events.as_ref(),
            AuthEvent::new(
                AuthEventKind::UserLoggedIn,
                user.id,
                json!({ "email": user.email, "ip": client.ip }),
            ),
        );

        Ok(AuthOutcome { user, tokens })
    }

    /// Exchange a refresh credential for a fresh pair, consuming its session.
    #[instrument(skip(self, ctx, refresh_token, client), fields(ip = %client.ip))]
    pub fn refresh(&self, ctx: &RequestContext, refresh_token: &str, client: &ClientInfo) -> AuthResult<TokenPair> {
        ctx.check()?;

        let payload = self.issuer.verify_refresh(refresh_token)?;
        let session = self.store.get_session_by_token(refresh_token)?;

        if session.user_id != payload.user_id {
            warn!(session_id = %session.id, "refresh token subject does not own the session");
            return Err(AuthError::SessionMismatch);
        }

        if session.is_expired_at(Utc::now()) {
            if let Err(err) = self.store.delete_session(session.id) {
                warn!(session_id = %session.id, error = %err, "failed to delete expired session");
            }
            return Err(AuthError::ExpiredToken);
        }

        ctx.check()?;
        let tokens = self.store.exec_tx(|tx| {
            tx.delete_session(session.id)?;
            self.open_session(tx, payload.user_id, client)
        })?;

        info!(user_id = %payload.user_id, consumed = %session.id, "refresh token rotated");
        Ok(tokens)
    }

    /// Revoke the session behind `refresh_token`.
    ///
    /// Best-effort: deletion failures are logged and success is reported.
    #[instrument(skip(self, refresh_token))]
    pub fn logout(&self, refresh_token: &str) -> AuthResult<()> {
        match self.store.delete_session_by_token(refresh_token) {
            Ok(()) => info!("session revoked"),
            Err(err) => warn!(error = %err, "logout could not delete session"),
        }
        Ok(())
    }

    /// Verify the access credential carried in an `Authorization` header.
    pub fn authenticate(&self, authorization: &str) -> AuthResult<CredentialPayload> {
        let token = bearer_token(authorization).ok_or(AuthError::InvalidToken)?;
        Ok(self.issuer.verify_access(token)?)
    }

    fn open_session(&self, tx: &dyn Repositories, user_id: UserId, client: &ClientInfo) -> AuthResult<TokenPair> {
        let access = self.issuer.issue_access(user_id)?;
        let refresh = self.issuer.issue_refresh(user_id)?;

        tx.create_session(&Session {
            id: SessionId::new(),
            user_id,
            refresh_token: refresh.token.clone(),
            ip_address: client.ip.clone(),
            user_agent: client.user_agent.clone(),
            expires_at: refresh.payload.expires_at,
            created_at: refresh.payload.issued_at,
        })?;

        Ok(TokenPair::new(access, refresh))
    }

    fn cache_user(&self, user: &User) {
        if let Err(err) = self.cache.set_user(user) {
            warn!(user_id = %user.id, error = %err, "failed to cache user");
        }
    }
}
