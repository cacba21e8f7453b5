//! Redis implementation of [`Store`].
//!
//! Commands are issued individually through a `ConnectionManager`, which
//! reconnects transparently. No `MULTI`/`EXEC` is used anywhere: the queue
//! gets its atomicity from the store-backed lock instead.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use super::{Limit, ScoreRange, Store};
use crate::error::StoreError;

/// Redis-backed store.
#[derive(Clone)]
pub struct RedisStore {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
}

impl RedisStore {
    /// Connects to Redis.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        Ok(Self { redis })
    }

    /// Creates a store from an existing ConnectionManager.
    pub fn from_connection(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    /// Returns a handle to the underlying connection, e.g. for publishing.
    pub fn connection(&self) -> ConnectionManager {
        self.redis.clone()
    }
}

fn bound(value: Option<i64>, unbounded: &str) -> String {
    match value {
        Some(v) => v.to_string(),
        None => unbounded.to_string(),
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn zadd(&self, key: &str, entries: &[(String, i64)]) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut conn = self.redis.clone();
        let mut cmd = redis::cmd("ZADD");
        cmd.arg(key);
        for (member, score) in entries {
            cmd.arg(*score).arg(member);
        }
        cmd.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        range: ScoreRange,
        limit: Option<Limit>,
    ) -> Result<Vec<(String, i64)>, StoreError> {
        let mut conn = self.redis.clone();
        let mut cmd = redis::cmd("ZRANGEBYSCORE");
        cmd.arg(key)
            .arg(bound(range.min, "-inf"))
            .arg(bound(range.max, "+inf"))
            .arg("WITHSCORES");
        if let Some(limit) = limit {
            cmd.arg("LIMIT").arg(limit.offset).arg(limit.count);
        }

        let entries: Vec<(String, f64)> = cmd.query_async(&mut conn).await?;
        Ok(entries
            .into_iter()
            .map(|(member, score)| (member, score as i64))
            .collect())
    }

    async fn zrem_range_by_score(&self, key: &str, range: ScoreRange) -> Result<usize, StoreError> {
        let mut conn = self.redis.clone();
        let removed: usize = redis::cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg(bound(range.min, "-inf"))
            .arg(bound(range.max, "+inf"))
            .query_async(&mut conn)
            .await?;
        Ok(removed)
    }

    async fn zrem(&self, key: &str, members: &[String]) -> Result<usize, StoreError> {
        if members.is_empty() {
            return Ok(0);
        }

        let mut conn = self.redis.clone();
        let mut cmd = redis::cmd("ZREM");
        cmd.arg(key);
        for member in members {
            cmd.arg(member);
        }
        let removed: usize = cmd.query_async(&mut conn).await?;
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> Result<usize, StoreError> {
        let mut conn = self.redis.clone();
        let len: usize = redis::cmd("ZCARD").arg(key).query_async(&mut conn).await?;
        Ok(len)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.redis.clone();
        let value: Option<String> = redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        redis::cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(value)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn hset_nx(&self, key: &str, field: &str, value: &str) -> Result<bool, StoreError> {
        let mut conn = self.redis.clone();
        let written: bool = redis::cmd("HSETNX")
            .arg(key)
            .arg(field)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(written)
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<usize, StoreError> {
        if fields.is_empty() {
            return Ok(0);
        }

        let mut conn = self.redis.clone();
        let mut cmd = redis::cmd("HDEL");
        cmd.arg(key);
        for field in fields {
            cmd.arg(field);
        }
        let removed: usize = cmd.query_async(&mut conn).await?;
        Ok(removed)
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        let mut conn = self.redis.clone();
        let value: i64 = redis::cmd("HINCRBY")
            .arg(key)
            .arg(field)
            .arg(delta)
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.redis.clone();
        let map: HashMap<String, String> =
            redis::cmd("HGETALL").arg(key).query_async(&mut conn).await?;
        Ok(map)
    }

    async fn hlen(&self, key: &str) -> Result<usize, StoreError> {
        let mut conn = self.redis.clone();
        let len: usize = redis::cmd("HLEN").arg(key).query_async(&mut conn).await?;
        Ok(len)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.redis.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis().max(1) as u64);
        }
        cmd.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut conn = self.redis.clone();
        let value: i64 = redis::cmd("INCRBY")
            .arg(key)
            .arg(delta)
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.redis.clone();
        let applied: bool = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut conn)
            .await?;
        Ok(applied)
    }
}
