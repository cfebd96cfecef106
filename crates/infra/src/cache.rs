//! Non-authoritative read-through user cache.
//!
//! Callers treat every error as a miss and fall back to the store.

use std::collections::HashMap;
use std::convert::Infallible;
use std::io;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

use warden_core::UserId;

use crate::store::User;
use crate::workers::{PeriodicWorker, WorkerHandle};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

pub trait UserCache: Send + Sync {
    /// `Ok(None)` on a miss or an expired entry.
    fn get_user(&self, id: UserId) -> Result<Option<User>, CacheError>;
    fn set_user(&self, user: &User) -> Result<(), CacheError>;
    fn delete_user(&self, id: UserId) -> Result<(), CacheError>;
}

impl<C> UserCache for Arc<C>
where
    C: UserCache + ?Sized,
{
    fn get_user(&self, id: UserId) -> Result<Option<User>, CacheError> {
        (**self).get_user(id)
    }

    fn set_user(&self, user: &User) -> Result<(), CacheError> {
        (**self).set_user(user)
    }

    fn delete_user(&self, id: UserId) -> Result<(), CacheError> {
        (**self).delete_user(id)
    }
}

/// Process-local TTL cache.
#[derive(Debug)]
pub struct InMemoryUserCache {
    ttl: Duration,
    entries: RwLock<HashMap<UserId, (User, Instant)>>,
}

impl InMemoryUserCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get_user_at(&self, id: UserId, now: Instant) -> Option<User> {
        let entries = self.entries.read();
        let (user, stored_at) = entries.get(&id)?;
        (now.saturating_duration_since(*stored_at) < self.ttl).then(|| user.clone())
    }

    pub fn set_user_at(&self, user: &User, now: Instant) {
        self.entries.write().insert(user.id, (user.clone(), now));
    }

    /// Drop expired entries.
    pub fn purge_at(&self, now: Instant) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, (_, stored_at)| now.saturating_duration_since(*stored_at) < self.ttl);
        before - entries.len()
    }

    pub fn purge(&self) -> usize {
        self.purge_at(Instant::now())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Entries held, expired or not.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Purge expired entries once per TTL on a background thread.
///
/// Holds only a weak reference, like the limiter sweeper.
pub fn spawn_cache_purger(cache: &Arc<InMemoryUserCache>) -> io::Result<WorkerHandle> {
    let weak: Weak<InMemoryUserCache> = Arc::downgrade(cache);
    let interval = cache.ttl().max(Duration::from_millis(1));

    PeriodicWorker::spawn("user-cache-purger", interval, move || {
        if let Some(cache) = weak.upgrade() {
            let purged = cache.purge();
            if purged > 0 {
                debug!(purged, "expired cache entries purged");
            }
        }
        Ok::<_, Infallible>(())
    })
}

impl UserCache for InMemoryUserCache {
    fn get_user(&self, id: UserId) -> Result<Option<User>, CacheError> {
        Ok(self.get_user_at(id, Instant::now()))
    }

    fn set_user(&self, user: &User) -> Result<(), CacheError> {
        self.set_user_at(user, Instant::now());
        Ok(())
    }

    fn delete_user(&self, id: UserId) -> Result<(), CacheError> {
        self.entries.write().remove(&id);
        Ok(())
    }
}

/// Cache that never holds anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopUserCache;

impl UserCache for NoopUserCache {
    fn get_user(&self, _id: UserId) -> Result<Option<User>, CacheError> {
        Ok(None)
    }

    fn set_user(&self, _user: &User) -> Result<(), CacheError> {
        Ok(())
    }

    fn delete_user(&self, _id: UserId) -> Result<(), CacheError> {
        Ok(())
    }
}
