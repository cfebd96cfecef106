use std::collections::HashMap;
use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::io;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use super::{RateLimitConfig, RateLimitError, RequestIdentity};
use crate::workers::{PeriodicWorker, WorkerHandle};

const SHARDS: usize = 16;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

/// Per-key token-bucket limiter.
///
/// Buckets are spread over independently locked shards; each admission or
/// sweep holds at most one shard lock at a time.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    shards: Vec<Mutex<HashMap<String, Bucket>>>,
    hasher: RandomState,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Result<Self, RateLimitError> {
        if config.capacity == 0 {
            return Err(RateLimitError::ZeroCapacity);
        }
        if config.window.is_zero() {
            return Err(RateLimitError::ZeroWindow);
        }
        Ok(Self {
            config,
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
            hasher: RandomState::new(),
        })
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Admit one request for the caller, keyed by the configured strategy.
    pub fn check(&self, identity: &RequestIdentity) -> bool {
        self.allow(&self.config.key.key(identity))
    }

    pub fn allow(&self, key: &str) -> bool {
        self.allow_at(key, Instant::now())
    }

    /// Admission decision against an explicit clock.
    pub fn allow_at(&self, key: &str, now: Instant) -> bool {
        let capacity = self.config.capacity;
        let mut shard = self.shard(key).lock();

        let Some(bucket) = shard.get_mut(key) else {
            shard.insert(
                key.to_string(),
                Bucket {
                    tokens: capacity - 1,
                    last_refill: now,
                },
            );
            return true;
        };

        let windows = now.saturating_duration_since(bucket.last_refill).as_nanos() / self.config.window.as_nanos();
        if windows > 0 {
            let refill = windows.saturating_mul(u128::from(capacity));
            let topped = (u128::from(bucket.tokens) + refill).min(u128::from(capacity));
            bucket.tokens = u32::try_from(topped).unwrap_or(capacity);
            bucket.last_refill = now;
        }

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            debug!(key, "rate limit exceeded");
            false
        }
    }

    /// Evict buckets idle for more than `2 * window`; returns how many went.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let idle = self.idle_after();
        let mut evicted = 0;
        for shard in &self.shards {
            let mut shard = shard.lock();
            let before = shard.len();
            shard.retain(|_, b| now.saturating_duration_since(b.last_refill) <= idle);
            evicted += before - shard.len();
        }
        if evicted > 0 {
            debug!(evicted, "rate limiter swept idle buckets");
        }
        evicted
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Number of live buckets.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn idle_after(&self) -> Duration {
        self.config.window.saturating_mul(2)
    }

    fn shard(&self, key: &str) -> &Mutex<HashMap<String, Bucket>> {
        let idx = (self.hasher.hash_one(key) as usize) % SHARDS;
        &self.shards[idx]
    }
}

/// Sweep `limiter` every `2 * window` on a background thread.
///
/// The worker holds only a weak reference; once the limiter is dropped the
/// ticks become no-ops until the handle is shut down.
pub fn spawn_sweeper(name: &'static str, limiter: &Arc<RateLimiter>) -> io::Result<WorkerHandle> {
    let weak: Weak<RateLimiter> = Arc::downgrade(limiter);
    let interval = limiter.idle_after();

    PeriodicWorker::spawn(name, interval, move || {
        if let Some(limiter) = weak.upgrade() {
            limiter.sweep();
        }
        Ok::<_, RateLimitError>(())
    })
}
