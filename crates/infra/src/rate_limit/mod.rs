//! In-memory token-bucket admission control.
//!
//! Each key owns a bucket of `capacity` tokens. A bucket is created on first
//! sight with one token already spent, refills to full once per elapsed
//! `window`, and is evicted by the sweeper after `2 * window` of inactivity.

mod limiter;

use std::time::Duration;

use thiserror::Error;

use warden_core::UserId;

pub use limiter::{RateLimiter, spawn_sweeper};

/// How a request is mapped to a bucket key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStrategy {
    /// Always the client IP.
    ClientIp,
    /// `user:<id>` once authenticated, otherwise the client IP.
    UserOrIp,
}

impl KeyStrategy {
    pub fn key(&self, identity: &RequestIdentity) -> String {
        match (self, identity.user_id) {
            (KeyStrategy::UserOrIp, Some(user_id)) => format!("user:{user_id}"),
            _ => identity.ip.clone(),
        }
    }
}

/// What the limiter knows about the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIdentity {
    pub ip: String,
    pub user_id: Option<UserId>,
}

impl RequestIdentity {
    pub fn anonymous(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            user_id: None,
        }
    }

    pub fn authenticated(ip: impl Into<String>, user_id: UserId) -> Self {
        Self {
            ip: ip.into(),
            user_id: Some(user_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub window: Duration,
    pub key: KeyStrategy,
}

impl RateLimitConfig {
    /// Strict bucket for credential endpoints: 5 per minute per IP.
    pub fn auth() -> Self {
        Self {
            capacity: 5,
            window: Duration::from_secs(60),
            key: KeyStrategy::ClientIp,
        }
    }

    /// Lenient bucket for everything else: 100 per minute per user or IP.
    pub fn general() -> Self {
        Self {
            capacity: 100,
            window: Duration::from_secs(60),
            key: KeyStrategy::UserOrIp,
        }
    }

    pub fn with_limits(mut self, capacity: u32, window: Duration) -> Self {
        self.capacity = capacity;
        self.window = window;
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("rate limit capacity must be at least 1")]
    ZeroCapacity,

    #[error("rate limit window must be non-zero")]
    ZeroWindow,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_keys_fall_back_to_ip() {
        let user = UserId::new();
        let anon = RequestIdentity::anonymous("1.2.3.4");
        let authed = RequestIdentity::authenticated("1.2.3.4", user);

        assert_eq!(KeyStrategy::UserOrIp.key(&anon), "1.2.3.4");
        assert_eq!(KeyStrategy::UserOrIp.key(&authed), format!("user:{user}"));
        assert_eq!(KeyStrategy::ClientIp.key(&authed), "1.2.3.4");
    }

    #[test]
    fn named_configurations() {
        assert_eq!(RateLimitConfig::auth().capacity, 5);
        assert_eq!(RateLimitConfig::auth().key, KeyStrategy::ClientIp);
        assert_eq!(RateLimitConfig::general().capacity, 100);
        assert_eq!(RateLimitConfig::general().window, Duration::from_secs(60));
    }
}
