//! In-memory cache backend for single-process operation.
//!
//! State is not persisted across restarts.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::backend::{CacheBackend, CacheError, CacheResult};

struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    sets: HashMap<String, HashSet<String>>,
}

/// In-memory cache backend.
#[derive(Clone, Default)]
pub struct InMemoryCacheBackend {
    state: Arc<RwLock<State>>,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let now = Instant::now();
        let state = self.state.read().await;
        Ok(state
            .entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut state = self.state.write().await;
        state.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> CacheResult<()> {
        let mut state = self.state.write().await;
        for key in keys {
            state.entries.remove(key);
            state.sets.remove(key);
        }
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        let now = Instant::now();
        let mut state = self.state.write().await;
        if state.entries.get(key).is_some_and(|e| !e.is_expired(now)) {
            return Ok(false);
        }
        state.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn add_to_set(&self, key: &str, member: &str) -> CacheResult<()> {
        let mut state = self.state.write().await;
        state
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_members(&self, key: &str) -> CacheResult<Vec<String>> {
        let state = self.state.read().await;
        Ok(state
            .sets
            .get(key)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_many(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>> {
        let now = Instant::now();
        let state = self.state.read().await;
        Ok(keys
            .iter()
            .map(|key| {
                state
                    .entries
                    .get(key)
                    .filter(|e| !e.is_expired(now))
                    .map(|e| e.value.clone())
            })
            .collect())
    }

    async fn increment(&self, key: &str, window: Duration) -> CacheResult<(u64, Duration)> {
        let now = Instant::now();
        let mut state = self.state.write().await;
        let entry = state
            .entries
            .entry(key.to_string())
            .and_modify(|e| {
                if e.is_expired(now) {
                    e.value = "0".to_string();
                    e.expires_at = now + window;
                }
            })
            .or_insert_with(|| Entry {
                value: "0".to_string(),
                expires_at: now + window,
            });
        let count = entry.value.parse::<u64>().map_err(|_| {
            CacheError::Backend(format!("{} does not hold a counter", key))
        })? + 1;
        entry.value = count.to_string();
        Ok((count, entry.expires_at.saturating_duration_since(now)))
    }

    async fn purge_expired(&self) -> CacheResult<usize> {
        let now = Instant::now();
        let mut state = self.state.write().await;
        let before = state.entries.len();
        state.entries.retain(|_, e| !e.is_expired(now));
        let removed = before - state.entries.len();

        // Forget tag members whose entries are gone.
        let State { entries, sets } = &mut *state;
        for members in sets.values_mut() {
            members.retain(|key| entries.contains_key(key));
        }
        sets.retain(|_, members| !members.is_empty());

        Ok(removed)
    }
}
