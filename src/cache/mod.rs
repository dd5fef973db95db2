//! Cache and dedup layer.
//!
//! [`Cache`] wraps a [`CacheBackend`] with key namespacing, JSON
//! serialization, tag groups and a best-effort lock. Backend failures never
//! reach callers: reads degrade to a miss and writes to a no-op, each with a
//! logged warning.

mod backend;
mod memory;
#[cfg(feature = "redis-backend")]
mod redis;

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

pub use backend::{CacheBackend, CacheError, CacheResult};
pub use memory::InMemoryCacheBackend;
#[cfg(feature = "redis-backend")]
pub use redis::RedisCacheBackend;

/// Namespace prepended to every key.
pub const DEFAULT_PREFIX: &str = "pricecrawl:";
/// TTL used when a caller passes none.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);
/// Lock TTL used when a caller passes none.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);

/// Outcome of a lock attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Acquired,
    /// Someone else holds the lock.
    Held,
    /// The backend failed; nothing is known about the lock.
    Unavailable,
}

#[derive(Clone)]
pub struct Cache {
    backend: Arc<dyn CacheBackend>,
    prefix: String,
    default_ttl: Duration,
}

impl Cache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            prefix: DEFAULT_PREFIX.to_string(),
            default_ttl: DEFAULT_TTL,
        }
    }

    /// Cache over a fresh in-memory backend.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryCacheBackend::new()))
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn tag_key(&self, tag: &str) -> String {
        format!("{}tag:{}", self.prefix, tag)
    }

    fn lock_key(&self, key: &str) -> String {
        format!("{}lock:{}", self.prefix, key)
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.backend.get(&self.key(key)).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!("Cache get failed for {}: {}", key, e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Discarding undecodable cache entry {}: {}", key, e);
                None
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        if let Err(e) = self.try_set(&self.key(key), value, ttl).await {
            warn!("Cache set failed for {}: {}", key, e);
        }
    }

    async fn try_set<T: Serialize>(
        &self,
        full_key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        let raw = serde_json::to_string(value)?;
        self.backend
            .set(full_key, &raw, ttl.unwrap_or(self.default_ttl))
            .await
    }

    pub async fn delete(&self, key: &str) {
        if let Err(e) = self.backend.delete(&[self.key(key)]).await {
            warn!("Cache delete failed for {}: {}", key, e);
        }
    }

    /// Store `value` and record `key` under each tag for later group invalidation.
    pub async fn set_with_tags<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        tags: &[String],
        ttl: Option<Duration>,
    ) {
        let full_key = self.key(key);
        if let Err(e) = self.try_set(&full_key, value, ttl).await {
            warn!("Cache set failed for {}: {}", key, e);
            return;
        }
        for tag in tags {
            if let Err(e) = self.backend.add_to_set(&self.tag_key(tag), &full_key).await {
                warn!("Cache tag {} failed for {}: {}", tag, key, e);
            }
        }
    }

    /// Invalidate every key ever tagged with `tag`. Returns how many keys were dropped.
    pub async fn delete_by_tag(&self, tag: &str) -> usize {
        let tag_key = self.tag_key(tag);
        let mut keys = match self.backend.set_members(&tag_key).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Cache tag lookup failed for {}: {}", tag, e);
                return 0;
            }
        };
        let count = keys.len();
        keys.push(tag_key);
        if let Err(e) = self.backend.delete(&keys).await {
            warn!("Cache tag invalidation failed for {}: {}", tag, e);
            return 0;
        }
        debug!("Invalidated {} cache key(s) tagged {}", count, tag);
        count
    }

    /// Try to take the lock for `key`. Never fair, never queued; the TTL
    /// releases locks whose holder died.
    pub async fn try_lock(&self, key: &str, ttl: Option<Duration>) -> LockState {
        match self
            .backend
            .set_if_absent(&self.lock_key(key), "1", ttl.unwrap_or(DEFAULT_LOCK_TTL))
            .await
        {
            Ok(true) => LockState::Acquired,
            Ok(false) => LockState::Held,
            Err(e) => {
                warn!("Cache lock failed for {}: {}", key, e);
                LockState::Unavailable
            }
        }
    }

    /// Whether the lock for `key` was acquired.
    pub async fn lock(&self, key: &str, ttl: Option<Duration>) -> bool {
        self.try_lock(key, ttl).await == LockState::Acquired
    }

    pub async fn unlock(&self, key: &str) {
        if let Err(e) = self.backend.delete(&[self.lock_key(key)]).await {
            warn!("Cache unlock failed for {}: {}", key, e);
        }
    }

    pub async fn mset<T: Serialize>(&self, entries: &[(String, T)], ttl: Option<Duration>) {
        for (key, value) in entries {
            self.set(key, value, ttl).await;
        }
    }

    /// Values for `keys` in order; misses and failures are `None`.
    pub async fn mget<T: DeserializeOwned>(&self, keys: &[&str]) -> Vec<Option<T>> {
        let full_keys: Vec<String> = keys.iter().map(|k| self.key(k)).collect();
        match self.backend.get_many(&full_keys).await {
            Ok(values) => values
                .into_iter()
                .map(|raw| raw.and_then(|raw| serde_json::from_str(&raw).ok()))
                .collect(),
            Err(e) => {
                warn!("Cache mget failed: {}", e);
                keys.iter().map(|_| None).collect()
            }
        }
    }

    /// Count a hit in the fixed window at `key`. Unlike the other operations
    /// this reports backend failures, so callers choose how to degrade.
    pub async fn increment(&self, key: &str, window: Duration) -> CacheResult<(u64, Duration)> {
        self.backend.increment(&self.key(key), window).await
    }

    /// Drop expired entries from backends without native expiry.
    pub async fn purge_expired(&self) -> usize {
        match self.backend.purge_expired().await {
            Ok(removed) => removed,
            Err(e) => {
                warn!("Cache purge failed: {}", e);
                0
            }
        }
    }
}
