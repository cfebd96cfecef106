//! Infrastructure layer: storage, caching, admission control, background
//! workers and configuration.

pub mod cache;
pub mod config;
pub mod filter;
pub mod rate_limit;
pub mod store;
pub mod workers;

pub use cache::{CacheError, InMemoryUserCache, NoopUserCache, UserCache};
pub use config::{AppConfig, ConfigError, Environment};
pub use filter::{Filter, FilterParams, Page, SortOrder};
pub use rate_limit::{KeyStrategy, RateLimitConfig, RateLimiter, RequestIdentity};
pub use store::{InMemoryStore, Store, StoreError};
pub use workers::WorkerHandle;
