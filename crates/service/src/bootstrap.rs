//! Wiring: build every service and background worker from an [`AppConfig`].

use std::io;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use warden_auth::{CredentialIssuer, IssuerError, PasswordError, PasswordHasher};
use warden_core::{AuthError, AuthResult};
use warden_infra::cache::spawn_cache_purger;
use warden_infra::rate_limit::{RateLimitError, spawn_sweeper};
use warden_infra::workers::spawn_session_sweeper;
use warden_infra::{AppConfig, InMemoryUserCache, RateLimiter, RequestIdentity, Store, UserCache, WorkerHandle};

use crate::auth::AuthService;
use crate::events::{EventPublisher, NoopEventPublisher};
use crate::user::UserService;
use crate::workspace::WorkspaceService;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("credential issuer: {0}")]
    Issuer(#[from] IssuerError),

    #[error("password hasher: {0}")]
    Password(#[from] PasswordError),

    #[error("rate limiter: {0}")]
    RateLimit(#[from] RateLimitError),

    #[error("failed to spawn background worker: {0}")]
    Worker(#[from] io::Error),
}

/// Which admission bucket a request is charged against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitClass {
    /// Register/login/refresh: strict, keyed by client IP.
    Auth,
    /// Everything else: lenient, keyed by user once authenticated.
    General,
}

/// The assembled service graph plus its background workers.
///
/// Dropping `Services` stops the workers without waiting;
/// [`shutdown`](Self::shutdown) waits for them.
pub struct Services<S> {
    pub auth: AuthService<S>,
    pub workspaces: WorkspaceService<S>,
    pub users: UserService<S>,
    auth_limiter: Arc<RateLimiter>,
    general_limiter: Arc<RateLimiter>,
    workers: Vec<WorkerHandle>,
}

impl<S> core::fmt::Debug for Services<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Services")
            .field("auth_limiter", &self.auth_limiter.config())
            .field("general_limiter", &self.general_limiter.config())
            .field("workers", &self.workers.iter().map(WorkerHandle::name).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl<S: Store + 'static> Services<S> {
    /// Build with an in-memory user cache and no event transport.
    ///
    /// The cache gets its own purger worker so expired entries do not pile up.
    pub fn build(config: &AppConfig, store: Arc<S>) -> Result<Self, BootstrapError> {
        let cache = Arc::new(InMemoryUserCache::new(config.user_cache_ttl));
        let purger = spawn_cache_purger(&cache)?;

        let mut services = Self::build_with(config, store, cache, Arc::new(NoopEventPublisher))?;
        services.workers.push(purger);
        Ok(services)
    }

    pub fn build_with(
        config: &AppConfig,
        store: Arc<S>,
        cache: Arc<dyn UserCache>,
        events: Arc<dyn EventPublisher>,
    ) -> Result<Self, BootstrapError> {
        let issuer = Arc::new(CredentialIssuer::new(config.token_key.clone(), config.tokens)?);
        let hasher = PasswordHasher::new(config.password_hashing)?;

        let auth_limiter = Arc::new(RateLimiter::new(config.auth_rate_limit)?);
        let general_limiter = Arc::new(RateLimiter::new(config.rate_limit)?);

        let workers = vec![
            spawn_sweeper("auth-limiter-sweeper", &auth_limiter)?,
            spawn_sweeper("general-limiter-sweeper", &general_limiter)?,
            spawn_session_sweeper(store.clone(), config.session_sweep_interval)?,
        ];

        info!(
            environment = ?config.environment,
            access_ttl = ?config.tokens.access_ttl,
            refresh_ttl = ?config.tokens.refresh_ttl,
            "services started"
        );

        Ok(Self {
            auth: AuthService::new(store.clone(), issuer, hasher, cache.clone(), events.clone()),
            workspaces: WorkspaceService::new(store.clone(), events.clone()),
            users: UserService::new(store, cache, events),
            auth_limiter,
            general_limiter,
            workers,
        })
    }
}

impl<S> Services<S> {
    /// Charge one request against the `class` bucket; `RateLimited` when empty.
    pub fn admit(&self, class: LimitClass, identity: &RequestIdentity) -> AuthResult<()> {
        let limiter = match class {
            LimitClass::Auth => &self.auth_limiter,
            LimitClass::General => &self.general_limiter,
        };
        if limiter.check(identity) {
            Ok(())
        } else {
            debug!(class = ?class, ip = %identity.ip, "request rate limited");
            Err(AuthError::RateLimited)
        }
    }

    /// Stop every background worker and wait for it to exit.
    pub fn shutdown(self) {
        for worker in self.workers {
            let name = worker.name();
            worker.shutdown();
            debug!(worker = name, "worker stopped");
        }
        info!("services stopped");
    }
}

/// Install the process-wide subscriber in the configured format.
pub fn init_logging(config: &AppConfig) {
    warden_observability::init_with(config.log_format, "info");
}
