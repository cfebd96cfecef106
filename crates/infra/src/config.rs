//! Process configuration loaded from environment variables.
//!
//! ```bash
//! SERVER_ENVIRONMENT=production          # development (default) | production
//! TOKEN_SYMMETRIC_KEY=<32 bytes>         # placeholder rejected in production
//! ACCESS_TOKEN_DURATION=15m
//! REFRESH_TOKEN_DURATION=168h
//! AUTH_RATE_LIMIT_REQUESTS=5
//! AUTH_RATE_LIMIT_WINDOW=1m
//! RATE_LIMIT_REQUESTS=100
//! RATE_LIMIT_WINDOW=1m
//! SESSION_SWEEP_INTERVAL=10m
//! USER_CACHE_TTL=15m
//! PASSWORD_HASH_MEMORY_KIB=19456
//! PASSWORD_HASH_ITERATIONS=2
//! LOG_FORMAT=json                        # json | pretty
//! ```
//!
//! Durations use humantime syntax. Malformed values are errors, never
//! silently replaced by defaults.

use core::str::FromStr;
use std::env;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use warden_auth::{KeyError, PasswordHashingConfig, SymmetricKey, TokenConfig};
use warden_observability::LogFormat;

use crate::rate_limit::RateLimitConfig;

/// Development-only key; refused when running in production.
pub const PLACEHOLDER_TOKEN_KEY: &str = "12345678901234567890123456789012";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("unknown environment '{other}'")),
        }
    }
}

/// Configuration errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    InvalidValue { var: &'static str, reason: String },

    #[error("{var} must be greater than zero")]
    Zero { var: &'static str },

    #[error("TOKEN_SYMMETRIC_KEY: {0}")]
    Key(#[from] KeyError),

    #[error("TOKEN_SYMMETRIC_KEY must be changed in production")]
    PlaceholderKeyInProduction,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub token_key: SymmetricKey,
    pub tokens: TokenConfig,
    pub auth_rate_limit: RateLimitConfig,
    pub rate_limit: RateLimitConfig,
    pub session_sweep_interval: Duration,
    pub user_cache_ttl: Duration,
    pub password_hashing: PasswordHashingConfig,
    pub log_format: LogFormat,
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let environment: Environment = vars.parsed("SERVER_ENVIRONMENT", Environment::Development)?;

        let raw_key = lookup("TOKEN_SYMMETRIC_KEY").unwrap_or_else(|| PLACEHOLDER_TOKEN_KEY.to_string());
        let token_key = SymmetricKey::from_bytes(raw_key.as_bytes())?;
        if raw_key == PLACEHOLDER_TOKEN_KEY {
            if environment.is_production() {
                return Err(ConfigError::PlaceholderKeyInProduction);
            }
            warn!("using the development placeholder token key");
        }

        let tokens = TokenConfig {
            access_ttl: vars.duration("ACCESS_TOKEN_DURATION", TokenConfig::default().access_ttl)?,
            refresh_ttl: vars.duration("REFRESH_TOKEN_DURATION", TokenConfig::default().refresh_ttl)?,
        };

        let auth_defaults = RateLimitConfig::auth();
        let auth_rate_limit = auth_defaults.with_limits(
            vars.count("AUTH_RATE_LIMIT_REQUESTS", auth_defaults.capacity)?,
            vars.duration("AUTH_RATE_LIMIT_WINDOW", auth_defaults.window)?,
        );

        let general_defaults = RateLimitConfig::general();
        let rate_limit = general_defaults.with_limits(
            vars.count("RATE_LIMIT_REQUESTS", general_defaults.capacity)?,
            vars.duration("RATE_LIMIT_WINDOW", general_defaults.window)?,
        );

        let hashing_defaults = PasswordHashingConfig::default();
        let password_hashing = PasswordHashingConfig {
            memory_kib: vars.count("PASSWORD_HASH_MEMORY_KIB", hashing_defaults.memory_kib)?,
            iterations: vars.count("PASSWORD_HASH_ITERATIONS", hashing_defaults.iterations)?,
        };

        Ok(Self {
            environment,
            token_key,
            tokens,
            auth_rate_limit,
            rate_limit,
            session_sweep_interval: vars.duration("SESSION_SWEEP_INTERVAL", Duration::from_secs(10 * 60))?,
            user_cache_ttl: vars.duration("USER_CACHE_TTL", Duration::from_secs(15 * 60))?,
            password_hashing,
            log_format: vars.parsed("LOG_FORMAT", LogFormat::Json)?,
        })
    }
}

struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn parsed<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: core::fmt::Display,
    {
        match (self.0)(var) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                var,
                reason: e.to_string(),
            }),
        }
    }

    fn duration(&self, var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        let value = match (self.0)(var) {
            None => default,
            Some(raw) => humantime::parse_duration(raw.trim()).map_err(|e| ConfigError::InvalidValue {
                var,
                reason: e.to_string(),
            })?,
        };
        if value.is_zero() {
            return Err(ConfigError::Zero { var });
        }
        Ok(value)
    }

    fn count(&self, var: &'static str, default: u32) -> Result<u32, ConfigError> {
        let value: u32 = self.parsed(var, default)?;
        if value == 0 {
            return Err(ConfigError::Zero { var });
        }
        Ok(value)
    }
}
