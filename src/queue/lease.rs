//! Pending and claimed task sets.
//!
//! The queue uses two sorted sets and one hash:
//!
//! - `{namespace}:tasks`: pending tasks, scored by enqueue time
//! - `{namespace}:claims`: claimed tasks, scored by claim time (or by a
//!   backdated time for scheduled retries)
//! - `{namespace}:attempts`: failed attempts per task key
//!
//! Members of both sets are task keys. None of the operations here lock;
//! the engine calls the claim-side ones from inside its claim lock.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::QueueError;
use crate::metrics::MetricsCollector;
use crate::store::{now_millis, Limit, ScoreRange, Store};

use super::task::Task;
use super::QueueKeys;

/// One of the two lease sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseSet {
    Pending,
    Claimed,
}

impl LeaseSet {
    /// Label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            LeaseSet::Pending => "pending",
            LeaseSet::Claimed => "claimed",
        }
    }
}

/// Lease bookkeeping over a [`Store`].
#[derive(Clone)]
pub struct LeaseStore {
    store: Arc<dyn Store>,
    keys: QueueKeys,
    metrics: MetricsCollector,
}

impl LeaseStore {
    pub fn new(store: Arc<dyn Store>, keys: QueueKeys) -> Self {
        Self {
            store,
            keys,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn keys(&self) -> &QueueKeys {
        &self.keys
    }

    fn set_key(&self, set: LeaseSet) -> &str {
        match set {
            LeaseSet::Pending => &self.keys.pending,
            LeaseSet::Claimed => &self.keys.claimed,
        }
    }

    /// Adds a task to the pending set, scored `now`.
    ///
    /// A task carrying a non-zero attempt count has it recorded too.
    pub async fn enqueue(&self, task: &Task, now: i64) -> Result<(), QueueError> {
        if task.attempts() > 0 {
            self.store
                .hset(&self.keys.attempts, task.key(), &task.attempts().to_string())
                .await?;
        }
        self.store
            .zadd(&self.keys.pending, &[(task.to_member(), now)])
            .await?;
        Ok(())
    }

    /// Drops entries of `set` scored before `now - max_age`.
    ///
    /// Returns the number of entries removed.
    pub async fn prune_older_than(
        &self,
        set: LeaseSet,
        max_age: Duration,
    ) -> Result<usize, QueueError> {
        let key = self.set_key(set);
        let cutoff = now_millis() - max_age.as_millis() as i64;
        let range = ScoreRange::before(cutoff);

        let expired = self.store.zrange_by_score(key, range, None).await?;
        if expired.is_empty() {
            return Ok(0);
        }

        let removed = self.store.zrem_range_by_score(key, range).await?;
        let members: Vec<String> = expired.into_iter().map(|(member, _)| member).collect();
        self.store.hdel(&self.keys.attempts, &members).await?;

        warn!(
            set = set.label(),
            count = removed,
            max_age_ms = max_age.as_millis() as u64,
            "Pruned expired tasks"
        );
        self.metrics.record_pruned(set.label(), removed);

        Ok(removed)
    }

    /// Up to `count` entries of `set` with the lowest scores, decoded.
    ///
    /// Members that are not valid tasks are removed from the set.
    pub async fn claim_oldest(&self, set: LeaseSet, count: usize) -> Result<Vec<Task>, QueueError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let entries = self
            .store
            .zrange_by_score(self.set_key(set), ScoreRange::all(), Some(Limit::first(count)))
            .await?;
        self.decode(set, entries).await
    }

    /// Moves tasks from pending to claimed, scored `now`.
    pub async fn move_to_claimed(&self, tasks: &[Task], now: i64) -> Result<(), QueueError> {
        if tasks.is_empty() {
            return Ok(());
        }
        let entries: Vec<(String, i64)> = tasks.iter().map(|t| (t.to_member(), now)).collect();
        let members: Vec<String> = entries.iter().map(|(m, _)| m.clone()).collect();

        self.store.zadd(&self.keys.claimed, &entries).await?;
        self.store.zrem(&self.keys.pending, &members).await?;
        Ok(())
    }

    /// Takes over up to `count` claims older than `deadline`.
    ///
    /// Stolen claims are re-scored to now so no other claimer picks them up
    /// before this one's own deadline passes.
    pub async fn steal_stale(
        &self,
        deadline: Duration,
        count: usize,
    ) -> Result<Vec<Task>, QueueError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let now = now_millis();
        let cutoff = now - deadline.as_millis() as i64;
        let entries = self
            .store
            .zrange_by_score(
                &self.keys.claimed,
                ScoreRange::before(cutoff),
                Some(Limit::first(count)),
            )
            .await?;
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let tasks = self.decode(LeaseSet::Claimed, entries).await?;
        let rescored: Vec<(String, i64)> = tasks.iter().map(|t| (t.to_member(), now)).collect();
        if !rescored.is_empty() {
            self.store.zadd(&self.keys.claimed, &rescored).await?;
            warn!(count = tasks.len(), "Stole abandoned claims");
            self.metrics.record_stolen(tasks.len());
        }
        Ok(tasks)
    }

    /// Removes a task's claim and its attempt count.
    pub async fn complete(&self, task: &Task) -> Result<(), QueueError> {
        let member = [task.to_member()];
        self.store.zrem(&self.keys.claimed, &member).await?;
        self.store.hdel(&self.keys.attempts, &member).await?;
        Ok(())
    }

    /// Removes a task's claim but keeps its attempt count.
    pub async fn release(&self, task: &Task) -> Result<(), QueueError> {
        self.store
            .zrem(&self.keys.claimed, &[task.to_member()])
            .await?;
        Ok(())
    }

    /// Increments a task's failed attempts and returns the new count.
    pub async fn record_failure(&self, task: &Task) -> Result<u32, QueueError> {
        let attempts = self
            .store
            .hincr_by(&self.keys.attempts, task.key(), 1)
            .await?;
        Ok(attempts.max(0) as u32)
    }

    /// Re-scores a task's claim.
    pub async fn reschedule(&self, task: &Task, score: i64) -> Result<(), QueueError> {
        self.store
            .zadd(&self.keys.claimed, &[(task.to_member(), score)])
            .await?;
        Ok(())
    }

    pub async fn pending_len(&self) -> Result<usize, QueueError> {
        Ok(self.store.zcard(&self.keys.pending).await?)
    }

    pub async fn claimed_len(&self) -> Result<usize, QueueError> {
        Ok(self.store.zcard(&self.keys.claimed).await?)
    }

    async fn decode(
        &self,
        set: LeaseSet,
        entries: Vec<(String, i64)>,
    ) -> Result<Vec<Task>, QueueError> {
        let mut tasks = Vec::with_capacity(entries.len());
        let mut invalid = Vec::new();

        for (member, _) in entries {
            match Task::from_member(&member) {
                Ok(mut task) => {
                    let attempts = self
                        .store
                        .hget(&self.keys.attempts, &member)
                        .await?
                        .and_then(|v| v.parse::<u32>().ok())
                        .unwrap_or(0);
                    task.set_attempts(attempts);
                    tasks.push(task);
                }
                Err(e) => {
                    warn!(set = set.label(), error = %e, "Dropping undecodable task");
                    invalid.push(member);
                }
            }
        }

        if !invalid.is_empty() {
            self.store.zrem(self.set_key(set), &invalid).await?;
            self.store.hdel(&self.keys.attempts, &invalid).await?;
        }

        Ok(tasks)
    }
}
