//! Advisory lock stored in a hash field.
//!
//! The holder writes its acquisition time into field `lock` of the lock key
//! with set-if-absent, then puts an expiration of `max_hold` on the key. A
//! holder older than `max_hold` (or with an unreadable timestamp) is presumed
//! dead and its entry is deleted so the next attempt can win.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tracing::{debug, warn};

use crate::config::LockConfig;
use crate::error::QueueError;
use crate::metrics::MetricsCollector;
use crate::store::{now_millis, Store};

use super::backoff_delay;

const LOCK_FIELD: &str = "lock";

/// Mutual exclusion over a store key, shared by every process using the store.
#[derive(Clone)]
pub struct Lock {
    store: Arc<dyn Store>,
    config: LockConfig,
    metrics: MetricsCollector,
}

impl Lock {
    pub fn new(store: Arc<dyn Store>, config: LockConfig) -> Self {
        Self {
            store,
            config,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Runs `section` while holding the lock at `key`.
    ///
    /// If the lock cannot be acquired within `max_attempts` tries, `section`
    /// is not run and `fallback` is returned. The lock is released on every
    /// exit path, including errors and panics raised by `section`.
    ///
    /// # Arguments
    ///
    /// * `key` - Store key holding the lock
    /// * `fallback` - Value returned when the lock cannot be acquired
    /// * `section` - Critical section
    ///
    /// # Errors
    ///
    /// Returns the section's error, or a store error raised while acquiring
    /// or releasing the lock.
    pub async fn with_lock<T, F, Fut>(
        &self,
        key: &str,
        fallback: T,
        section: F,
    ) -> Result<T, QueueError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, QueueError>>,
    {
        let started = Instant::now();
        let acquired = self.acquire(key).await?;
        self.metrics
            .record_lock_acquire(key, acquired, started.elapsed());

        if !acquired {
            debug!(
                key = key,
                attempts = self.config.max_attempts,
                "Lock not acquired; returning fallback"
            );
            return Ok(fallback);
        }

        let held = Instant::now();
        let outcome = AssertUnwindSafe(section()).catch_unwind().await;
        let released = self.release(key).await;
        self.metrics.record_lock_hold(key, held.elapsed());

        match outcome {
            Ok(Ok(value)) => {
                released?;
                Ok(value)
            }
            Ok(Err(e)) => {
                if let Err(release_err) = released {
                    warn!(key = key, error = %release_err, "Failed to release lock");
                }
                Err(e)
            }
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn acquire(&self, key: &str) -> Result<bool, QueueError> {
        let max_hold_ms = self.config.max_hold.as_millis() as i64;

        for attempt in 1..=self.config.max_attempts {
            let now = now_millis();
            if self
                .store
                .hset_nx(key, LOCK_FIELD, &now.to_string())
                .await?
            {
                self.store.expire(key, self.config.max_hold).await?;
                self.metrics.record_lock_attempt(key, true);
                return Ok(true);
            }
            self.metrics.record_lock_attempt(key, false);

            let stale = match self.store.hget(key, LOCK_FIELD).await? {
                // Released between our two calls.
                None => continue,
                Some(held_since) => match held_since.parse::<i64>() {
                    Ok(ts) => now - ts > max_hold_ms,
                    Err(_) => true,
                },
            };

            if stale {
                warn!(key = key, "Breaking stale lock");
                self.store.hdel(key, &[LOCK_FIELD.to_string()]).await?;
                continue;
            }

            if attempt < self.config.max_attempts {
                tokio::time::sleep(backoff_delay(
                    attempt,
                    self.config.backoff_step,
                    self.config.jitter,
                ))
                .await;
            }
        }

        Ok(false)
    }

    async fn release(&self, key: &str) -> Result<(), QueueError> {
        self.store.hdel(key, &[LOCK_FIELD.to_string()]).await?;
        Ok(())
    }
}
