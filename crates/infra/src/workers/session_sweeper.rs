use std::io;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use super::{PeriodicWorker, WorkerHandle};
use crate::store::{SessionRepository, Store, StoreError};

/// Delete expired sessions once, logging how many went.
pub fn sweep_expired_sessions<S: Store + ?Sized>(store: &S) -> Result<u64, StoreError> {
    let removed = store.delete_expired_sessions(Utc::now())?;
    if removed > 0 {
        info!(removed, "expired sessions deleted");
    } else {
        debug!("no expired sessions");
    }
    Ok(removed)
}

/// Run [`sweep_expired_sessions`] every `interval` on a background thread.
pub fn spawn_session_sweeper<S>(store: Arc<S>, interval: Duration) -> io::Result<WorkerHandle>
where
    S: Store + 'static,
{
    PeriodicWorker::spawn("session-sweeper", interval, move || {
        sweep_expired_sessions(store.as_ref()).map(|_| ())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, Session, User, UserRepository};
    use std::thread;
    use warden_core::SessionId;

    fn seed(store: &InMemoryStore) -> User {
        let user = User::new(None, String::new(), "Sweeper".into(), Utc::now());
        store.create_user(&user).unwrap();
        for (token, offset) in [("gone", -60), ("kept", 3600)] {
            store
                .create_session(&Session {
                    id: SessionId::new(),
                    user_id: user.id,
                    refresh_token: token.into(),
                    ip_address: "127.0.0.1".into(),
                    user_agent: "test".into(),
                    expires_at: Utc::now() + chrono::Duration::seconds(offset),
                    created_at: Utc::now(),
                })
                .unwrap();
        }
        user
    }

    #[test]
    fn one_shot_sweep_counts_removed_rows() {
        let store = InMemoryStore::new();
        let user = seed(&store);
        assert_eq!(sweep_expired_sessions(&store).unwrap(), 1);
        assert_eq!(store.count_sessions(user.id).unwrap(), 1);
    }

    #[test]
    fn background_sweeper_cleans_up() {
        let store = Arc::new(InMemoryStore::new());
        let user = seed(&store);

        let handle = spawn_session_sweeper(Arc::clone(&store), Duration::from_millis(10)).unwrap();
        thread::sleep(Duration::from_millis(80));
        handle.shutdown();

        assert_eq!(store.count_sessions(user.id).unwrap(), 1);
        assert!(store.get_session_by_token("gone").is_err());
    }
}
