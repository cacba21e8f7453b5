//! Shared key-value / sorted-set store.
//!
//! The queue never relies on native queue primitives. Everything it needs is
//! expressed through the [`Store`] trait:
//!
//! - sorted sets: add-with-score, range-by-score with offset/count,
//!   remove-by-score-range, remove-members, cardinality
//! - hashes: get/set field, set-field-if-absent, delete fields, increment,
//!   get-all, length
//! - strings: get/set with optional expiration, increment, key expiration
//!
//! No operation is atomic with any other. Sequences that must appear atomic
//! to competing processes are wrapped in a [`Lock`](crate::queue::Lock).
//!
//! Two implementations are provided:
//!
//! - [`RedisStore`]: production backend over a Redis `ConnectionManager`
//! - [`MemoryStore`]: in-process backend with the same semantics, used by
//!   tests and single-process tools

pub mod memory;
pub mod redis_store;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// Every score and lock timestamp in the store uses this clock.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Inclusive score bounds for sorted-set range operations.
///
/// `None` on either side means unbounded (`-inf` / `+inf`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScoreRange {
    pub min: Option<i64>,
    pub max: Option<i64>,
}

impl ScoreRange {
    /// Every score.
    pub fn all() -> Self {
        Self::default()
    }

    /// Scores `<= max`.
    pub fn up_to(max: i64) -> Self {
        Self {
            min: None,
            max: Some(max),
        }
    }

    /// Scores strictly before `cutoff`.
    pub fn before(cutoff: i64) -> Self {
        Self::up_to(cutoff.saturating_sub(1))
    }

    /// Whether `score` falls inside the range.
    pub fn contains(&self, score: i64) -> bool {
        self.min.is_none_or(|min| score >= min) && self.max.is_none_or(|max| score <= max)
    }
}

/// Offset/count window applied after sorting by score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    pub offset: usize,
    pub count: usize,
}

impl Limit {
    /// The first `count` entries.
    pub fn first(count: usize) -> Self {
        Self { offset: 0, count }
    }
}

/// Primitive operations of the shared store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Adds or re-scores members of a sorted set.
    async fn zadd(&self, key: &str, entries: &[(String, i64)]) -> Result<(), StoreError>;

    /// Members with scores in `range`, lowest score first.
    async fn zrange_by_score(
        &self,
        key: &str,
        range: ScoreRange,
        limit: Option<Limit>,
    ) -> Result<Vec<(String, i64)>, StoreError>;

    /// Removes members with scores in `range`, returning how many were removed.
    async fn zrem_range_by_score(&self, key: &str, range: ScoreRange) -> Result<usize, StoreError>;

    /// Removes members, returning how many existed.
    async fn zrem(&self, key: &str, members: &[String]) -> Result<usize, StoreError>;

    /// Number of members in a sorted set.
    async fn zcard(&self, key: &str) -> Result<usize, StoreError>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;

    /// Sets `field` only when absent. Returns whether the value was written.
    async fn hset_nx(&self, key: &str, field: &str, value: &str) -> Result<bool, StoreError>;

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<usize, StoreError>;

    /// Increments an integer field and returns the new value.
    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError>;

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    async fn hlen(&self, key: &str) -> Result<usize, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Increments an integer value and returns the new value.
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    /// Sets a time-to-live on a key. Returns false when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;
}
