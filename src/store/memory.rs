//! In-process implementation of [`Store`].
//!
//! Mirrors the Redis semantics the queue relies on: sorted-set ties are
//! broken by member order, integer increments reject non-integer values,
//! and key expirations are honoured lazily on access.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::{now_millis, Limit, ScoreRange, Store};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct MemoryState {
    zsets: HashMap<String, HashMap<String, i64>>,
    hashes: HashMap<String, HashMap<String, String>>,
    strings: HashMap<String, String>,
    /// Expiration deadline in epoch milliseconds, per key.
    expires_at: HashMap<String, i64>,
}

impl MemoryState {
    fn evict_if_expired(&mut self, key: &str) {
        let expired = self
            .expires_at
            .get(key)
            .is_some_and(|deadline| *deadline <= now_millis());
        if expired {
            self.remove_key(key);
        }
    }

    fn remove_key(&mut self, key: &str) {
        self.zsets.remove(key);
        self.hashes.remove(key);
        self.strings.remove(key);
        self.expires_at.remove(key);
    }

    fn key_exists(&self, key: &str) -> bool {
        self.zsets.contains_key(key) || self.hashes.contains_key(key) || self.strings.contains_key(key)
    }

    /// Drops empty containers the way Redis deletes empty keys.
    fn tidy(&mut self, key: &str) {
        if self.zsets.get(key).is_some_and(|z| z.is_empty()) {
            self.zsets.remove(key);
        }
        if self.hashes.get(key).is_some_and(|h| h.is_empty()) {
            self.hashes.remove(key);
        }
        if !self.key_exists(key) {
            self.expires_at.remove(key);
        }
    }

    fn sorted_range(&self, key: &str, range: ScoreRange) -> Vec<(String, i64)> {
        let mut entries: Vec<(String, i64)> = self
            .zsets
            .get(key)
            .map(|zset| {
                zset.iter()
                    .filter(|(_, score)| range.contains(**score))
                    .map(|(member, score)| (member.clone(), *score))
                    .collect()
            })
            .unwrap_or_default();
        entries.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        entries
    }
}

/// Store kept entirely in process memory.
///
/// Cloning shares the same state, so several engines built from clones of
/// one `MemoryStore` behave like separate processes sharing one Redis.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self, key: &str) -> MutexGuard<'_, MemoryState> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.evict_if_expired(key);
        state
    }

    /// Remaining time-to-live of a key, if it has one.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let state = self.lock(key);
        state
            .expires_at
            .get(key)
            .map(|deadline| Duration::from_millis((*deadline - now_millis()).max(0) as u64))
    }
}

fn parse_integer(key: &str, value: &str) -> Result<i64, StoreError> {
    value.parse::<i64>().map_err(|_| StoreError::InvalidValue {
        key: key.to_string(),
        reason: format!("'{}' is not an integer", value),
    })
}

#[async_trait]
impl Store for MemoryStore {
    async fn zadd(&self, key: &str, entries: &[(String, i64)]) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut state = self.lock(key);
        let zset = state.zsets.entry(key.to_string()).or_default();
        for (member, score) in entries {
            zset.insert(member.clone(), *score);
        }
        Ok(())
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        range: ScoreRange,
        limit: Option<Limit>,
    ) -> Result<Vec<(String, i64)>, StoreError> {
        let state = self.lock(key);
        let entries = state.sorted_range(key, range);
        Ok(match limit {
            Some(limit) => entries
                .into_iter()
                .skip(limit.offset)
                .take(limit.count)
                .collect(),
            None => entries,
        })
    }

    async fn zrem_range_by_score(&self, key: &str, range: ScoreRange) -> Result<usize, StoreError> {
        let mut state = self.lock(key);
        let removed = match state.zsets.get_mut(key) {
            Some(zset) => {
                let before = zset.len();
                zset.retain(|_, score| !range.contains(*score));
                before - zset.len()
            }
            None => 0,
        };
        state.tidy(key);
        Ok(removed)
    }

    async fn zrem(&self, key: &str, members: &[String]) -> Result<usize, StoreError> {
        let mut state = self.lock(key);
        let removed = match state.zsets.get_mut(key) {
            Some(zset) => members
                .iter()
                .filter(|member| zset.remove(member.as_str()).is_some())
                .count(),
            None => 0,
        };
        state.tidy(key);
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> Result<usize, StoreError> {
        let state = self.lock(key);
        Ok(state.zsets.get(key).map_or(0, |zset| zset.len()))
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let state = self.lock(key);
        Ok(state.hashes.get(key).and_then(|hash| hash.get(field).cloned()))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut state = self.lock(key);
        state
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hset_nx(&self, key: &str, field: &str, value: &str) -> Result<bool, StoreError> {
        let mut state = self.lock(key);
        let hash = state.hashes.entry(key.to_string()).or_default();
        if hash.contains_key(field) {
            return Ok(false);
        }
        hash.insert(field.to_string(), value.to_string());
        Ok(true)
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<usize, StoreError> {
        let mut state = self.lock(key);
        let removed = match state.hashes.get_mut(key) {
            Some(hash) => fields
                .iter()
                .filter(|field| hash.remove(field.as_str()).is_some())
                .count(),
            None => 0,
        };
        state.tidy(key);
        Ok(removed)
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        let mut state = self.lock(key);
        let hash = state.hashes.entry(key.to_string()).or_default();
        let current = match hash.get(field) {
            Some(value) => parse_integer(key, value)?,
            None => 0,
        };
        let next = current + delta;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let state = self.lock(key);
        Ok(state.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn hlen(&self, key: &str) -> Result<usize, StoreError> {
        let state = self.lock(key);
        Ok(state.hashes.get(key).map_or(0, |hash| hash.len()))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let state = self.lock(key);
        Ok(state.strings.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut state = self.lock(key);
        state.strings.insert(key.to_string(), value.to_string());
        match ttl {
            Some(ttl) => {
                state
                    .expires_at
                    .insert(key.to_string(), now_millis() + ttl.as_millis() as i64);
            }
            None => {
                state.expires_at.remove(key);
            }
        }
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut state = self.lock(key);
        let current = match state.strings.get(key) {
            Some(value) => parse_integer(key, value)?,
            None => 0,
        };
        let next = current + delta;
        state.strings.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut state = self.lock(key);
        if !state.key_exists(key) {
            return Ok(false);
        }
        state
            .expires_at
            .insert(key.to_string(), now_millis() + ttl.as_millis() as i64);
        Ok(true)
    }
}
