//! Pluggable storage for the cache layer.
//!
//! Backends store raw strings under fully-qualified keys; namespacing,
//! serialization and failure handling live in [`super::Cache`].

use std::time::Duration;

use async_trait::async_trait;

/// Result type for cache backend operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors from cache backend operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    async fn delete(&self, keys: &[String]) -> CacheResult<()>;

    /// Store `value` only if `key` is absent. Returns whether it was stored.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool>;

    /// Add `member` to the set at `key`.
    async fn add_to_set(&self, key: &str, member: &str) -> CacheResult<()>;

    async fn set_members(&self, key: &str) -> CacheResult<Vec<String>>;

    async fn get_many(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>>;

    /// Increment the counter at `key`, starting a `window` expiry when it is
    /// created. Returns the new count and the time left until the counter expires.
    async fn increment(&self, key: &str, window: Duration) -> CacheResult<(u64, Duration)>;

    /// Drop expired entries. Backends with native expiry return 0.
    async fn purge_expired(&self) -> CacheResult<usize> {
        Ok(0)
    }
}
