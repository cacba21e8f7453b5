//! The work queue engine.
//!
//! An engine claims batches of tasks under the claim lock, dispatches each
//! one to its registered handler on its own tokio task, and applies the
//! retry policy when a handler fails. Any number of engines, in any number of
//! processes, may share one store.
//!
//! # Features
//!
//! - Bounded concurrency through a semaphore of `max_concurrent_claims`
//!   permits
//! - Stale claims are stolen before fresh pending tasks are claimed
//! - Failed tasks are retried with linear backoff until their attempt limit
//! - Runs end early once nothing is pending and nothing is in flight

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{Settings, WorkQueueConfig};
use crate::error::QueueError;
use crate::metrics::MetricsCollector;
use crate::store::{now_millis, Store};

use super::lease::{LeaseSet, LeaseStore};
use super::lock::Lock;
use super::registry::TaskRegistry;
use super::task::Task;
use super::{backoff_delay, QueueKeys};

/// Snapshot of queue and engine state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStats {
    /// Entries in the pending set.
    pub pending: usize,
    /// Entries in the claimed set, including scheduled retries.
    pub claimed: usize,
    /// Handlers running in this engine.
    pub in_flight: usize,
    /// Handler slots of this engine.
    pub max_concurrent_claims: usize,
    /// Handler successes seen by this engine.
    pub completed: u64,
    /// Handler failures seen by this engine (every attempt).
    pub failed: u64,
    /// Tasks this engine dropped after their last attempt.
    pub permanently_failed: u64,
    /// Tasks this engine discarded for lack of a handler.
    pub discarded: u64,
    /// Mean handler duration in milliseconds.
    pub average_handler_ms: u64,
}

impl QueueStats {
    /// Returns the success rate as a percentage of handler invocations.
    pub fn success_rate(&self) -> f64 {
        let total = self.completed + self.failed;
        if total == 0 {
            return 0.0;
        }
        (self.completed as f64 / total as f64) * 100.0
    }
}

/// What one `run_until` call dispatched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    /// Loop iterations executed.
    pub iterations: usize,
    /// Tasks handed to handlers, by task type.
    pub dispatched: HashMap<String, usize>,
}

impl RunSummary {
    pub fn total_dispatched(&self) -> usize {
        self.dispatched.values().sum()
    }
}

/// Counters shared by every handler task of one engine.
#[derive(Default)]
struct SharedStats {
    completed: AtomicU64,
    failed: AtomicU64,
    permanently_failed: AtomicU64,
    discarded: AtomicU64,
    total_handler_ms: AtomicU64,
}

impl SharedStats {
    fn record_handler(&self, success: bool, duration: Duration) {
        if success {
            self.completed.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
        self.total_handler_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn fill(&self, stats: &mut QueueStats) {
        stats.completed = self.completed.load(Ordering::SeqCst);
        stats.failed = self.failed.load(Ordering::SeqCst);
        stats.permanently_failed = self.permanently_failed.load(Ordering::SeqCst);
        stats.discarded = self.discarded.load(Ordering::SeqCst);

        let runs = stats.completed + stats.failed;
        if runs > 0 {
            stats.average_handler_ms = self.total_handler_ms.load(Ordering::SeqCst) / runs;
        }
    }
}

/// A work queue engine.
///
/// Cloning is cheap; clones share the semaphore, the counters and the
/// store handle, so a clone sees the same in-flight work.
#[derive(Clone)]
pub struct WorkQueue {
    id: Uuid,
    store: Arc<dyn Store>,
    registry: Arc<TaskRegistry>,
    config: Arc<WorkQueueConfig>,
    settings: Arc<Settings>,
    keys: QueueKeys,
    lock: Lock,
    leases: LeaseStore,
    permits: Arc<Semaphore>,
    stats: Arc<SharedStats>,
    metrics: MetricsCollector,
}

impl WorkQueue {
    /// Creates an engine over `store`.
    ///
    /// # Arguments
    ///
    /// * `store` - Shared store holding the queue
    /// * `registry` - Handlers for the task types this engine runs
    /// * `config` - Engine tuning; `settings` overrides apply on top
    /// * `settings` - Debug logging, poll interval and realtime batching flags
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<TaskRegistry>,
        config: WorkQueueConfig,
        settings: Settings,
    ) -> Self {
        let config = config.apply_settings(&settings);
        let keys = QueueKeys::new(&config.namespace);
        let lock = Lock::new(Arc::clone(&store), config.lock.clone());
        let leases = LeaseStore::new(Arc::clone(&store), keys.clone());
        let permits = Arc::new(Semaphore::new(config.max_concurrent_claims));

        Self {
            id: Uuid::new_v4(),
            store,
            registry,
            config: Arc::new(config),
            settings: Arc::new(settings),
            keys,
            lock,
            leases,
            permits,
            stats: Arc::new(SharedStats::default()),
            metrics: MetricsCollector::new(),
        }
    }

    /// Identifier of this engine instance, used in logs.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &WorkQueueConfig {
        &self.config
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn keys(&self) -> &QueueKeys {
        &self.keys
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn lock(&self) -> &Lock {
        &self.lock
    }

    pub fn leases(&self) -> &LeaseStore {
        &self.leases
    }

    /// Adds a task to the pending set, scored now.
    ///
    /// Enqueueing a task identical to one already pending only refreshes
    /// its score.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Store` if the store write fails.
    pub async fn enqueue(&self, task: Task) -> Result<(), QueueError> {
        self.leases.enqueue(&task, now_millis()).await?;
        self.metrics.record_enqueued(task.task_type());

        if self.settings.debug {
            debug!(
                instance = %self.id,
                task_type = task.task_type(),
                task_key = task.key(),
                "Enqueued task"
            );
        }
        Ok(())
    }

    /// Handlers currently running in this engine.
    pub fn in_flight(&self) -> usize {
        self.config
            .max_concurrent_claims
            .saturating_sub(self.permits.available_permits())
    }

    /// Current set sizes plus this engine's counters.
    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut stats = QueueStats {
            pending: self.leases.pending_len().await?,
            claimed: self.leases.claimed_len().await?,
            in_flight: self.in_flight(),
            max_concurrent_claims: self.config.max_concurrent_claims,
            ..Default::default()
        };
        self.stats.fill(&mut stats);
        Ok(stats)
    }

    /// Claims and dispatches tasks until `deadline`.
    ///
    /// Each iteration claims at most as many tasks as there are free permits
    /// and spawns one handler per task. The run ends early when a claim
    /// comes back empty while nothing is in flight. Handlers still running
    /// at the deadline keep running; use [`wait_for_idle`](Self::wait_for_idle)
    /// to wait for them.
    ///
    /// # Errors
    ///
    /// Returns a store error raised while claiming. Handler failures never
    /// surface here.
    pub async fn run_until(&self, deadline: DateTime<Utc>) -> Result<RunSummary, QueueError> {
        let deadline_ms = deadline.timestamp_millis();
        let mut summary = RunSummary::default();

        while now_millis() < deadline_ms {
            summary.iterations += 1;

            let available = self.permits.available_permits();
            if available > 0 {
                let tasks = self.claim_one_batch(available).await?;

                if tasks.is_empty() && self.in_flight() == 0 {
                    if self.settings.debug {
                        debug!(instance = %self.id, "No work available; ending run");
                    }
                    break;
                }

                for task in tasks {
                    let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
                        break;
                    };
                    *summary
                        .dispatched
                        .entry(task.task_type().to_string())
                        .or_default() += 1;

                    let engine = self.clone();
                    self.metrics.inc_in_flight();
                    tokio::spawn(async move {
                        let _permit = permit;
                        engine.handle(task).await;
                        engine.metrics.dec_in_flight();
                    });
                }
            } else if self.settings.debug {
                debug!(instance = %self.id, "All claim slots busy");
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }

        for (task_type, count) in &summary.dispatched {
            self.metrics.record_tasks_per_run(task_type, *count);
        }
        if self.settings.debug {
            debug!(
                instance = %self.id,
                iterations = summary.iterations,
                dispatched = summary.total_dispatched(),
                "Run finished"
            );
        }

        Ok(summary)
    }

    /// Claims up to `count` tasks under the claim lock.
    ///
    /// Prunes both sets by age, then returns stale claims if there are any,
    /// otherwise moves the oldest pending tasks to the claimed set. Returns
    /// an empty batch when the lock cannot be acquired.
    pub async fn claim_one_batch(&self, count: usize) -> Result<Vec<Task>, QueueError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        self.lock
            .with_lock(&self.keys.lock, Vec::new(), || self.claim_locked(count))
            .await
    }

    async fn claim_locked(&self, count: usize) -> Result<Vec<Task>, QueueError> {
        self.leases
            .prune_older_than(LeaseSet::Pending, self.config.max_task_age)
            .await?;
        self.leases
            .prune_older_than(LeaseSet::Claimed, self.config.max_task_age)
            .await?;

        let pending = self.leases.pending_len().await?;
        let claimed = self.leases.claimed_len().await?;
        self.metrics.update_queue_sizes(pending, claimed);

        if claimed > 0 {
            let stolen = self
                .leases
                .steal_stale(self.config.task_deadline, count)
                .await?;
            if !stolen.is_empty() {
                info!(instance = %self.id, count = stolen.len(), "Claimed abandoned tasks");
                return Ok(stolen);
            }
        }

        if pending == 0 {
            return Ok(Vec::new());
        }

        let tasks = self.leases.claim_oldest(LeaseSet::Pending, count).await?;
        self.leases.move_to_claimed(&tasks, now_millis()).await?;

        if self.settings.debug && !tasks.is_empty() {
            debug!(instance = %self.id, count = tasks.len(), "Claimed pending tasks");
        }
        Ok(tasks)
    }

    /// Runs one claimed task through its handler and settles its lease.
    ///
    /// Never fails: handler errors and panics become retries or permanent
    /// failures, and store errors while settling are logged.
    pub async fn handle(&self, task: Task) {
        let task_type = task.task_type().to_string();

        let Some(handler) = self.registry.lookup(&task_type) else {
            warn!(
                instance = %self.id,
                task_type = %task_type,
                task_key = task.key(),
                "No handler registered; discarding task"
            );
            self.metrics.record_discarded(&task_type);
            self.stats.discarded.fetch_add(1, Ordering::SeqCst);
            if let Err(e) = self.leases.complete(&task).await {
                error!(instance = %self.id, error = %e, "Failed to release discarded task");
            }
            return;
        };

        if self.settings.debug {
            debug!(
                instance = %self.id,
                task_type = %task_type,
                attempts = task.attempts(),
                "Running task"
            );
        }

        let started = Instant::now();
        let outcome = match AssertUnwindSafe(handler.handle(&task)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(anyhow::anyhow!(
                "handler panicked: {}",
                panic_message(panic.as_ref())
            )),
        };

        match outcome {
            Ok(()) => {
                if let Err(e) = self.leases.complete(&task).await {
                    error!(
                        instance = %self.id,
                        task_type = %task_type,
                        error = %e,
                        "Failed to release completed task"
                    );
                }
                let elapsed = started.elapsed();
                self.metrics.record_completed(&task_type, elapsed);
                self.stats.record_handler(true, elapsed);

                if self.settings.debug {
                    debug!(
                        instance = %self.id,
                        task_type = %task_type,
                        duration_ms = elapsed.as_millis() as u64,
                        "Task completed"
                    );
                }
            }
            Err(err) => {
                let elapsed = started.elapsed();
                self.metrics
                    .record_handler_duration(&task_type, false, elapsed);
                self.stats.record_handler(false, elapsed);
                self.fail(task, err).await;
            }
        }
    }

    async fn fail(&self, mut task: Task, err: anyhow::Error) {
        let task_type = task.task_type().to_string();
        self.metrics.record_failed(&task_type);

        // Nobody may steal the failed attempt while it waits out its backoff.
        if let Err(e) = self.leases.release(&task).await {
            error!(instance = %self.id, error = %e, "Failed to release failed task");
        }

        let attempts = match self.leases.record_failure(&task).await {
            Ok(attempts) => attempts,
            Err(e) => {
                error!(instance = %self.id, error = %e, "Failed to record task attempt");
                task.attempts() + 1
            }
        };
        task.set_attempts(attempts);

        let max_attempts = task.effective_max_attempts(self.config.default_max_attempts);
        if attempts >= max_attempts {
            error!(
                instance = %self.id,
                task_type = %task_type,
                task_key = task.key(),
                attempts = attempts,
                error = ?err,
                "Task failed permanently; dropping"
            );
            self.metrics.record_permanently_failed(&task_type);
            self.stats.permanently_failed.fetch_add(1, Ordering::SeqCst);
            if let Err(e) = self.leases.complete(&task).await {
                error!(instance = %self.id, error = %e, "Failed to drop failed task");
            }
            return;
        }

        warn!(
            instance = %self.id,
            task_type = %task_type,
            attempts = attempts,
            max_attempts = max_attempts,
            error = %err,
            "Task failed; scheduling retry"
        );

        tokio::time::sleep(backoff_delay(
            attempts,
            self.config.retry_backoff_step,
            self.config.retry_jitter,
        ))
        .await;

        // Re-inserted backdated by half the max age so the retry is
        // claimable right away but still ages out.
        let score = now_millis() - (self.config.max_task_age.as_millis() as i64) / 2;
        if let Err(e) = self.leases.reschedule(&task, score).await {
            error!(
                instance = %self.id,
                task_type = %task_type,
                error = %e,
                "Failed to reschedule task"
            );
        }
    }

    /// Waits until no handler of this engine is running.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Timeout` if handlers are still running after
    /// `timeout`.
    pub async fn wait_for_idle(&self, timeout: Duration) -> Result<(), QueueError> {
        let all = self.config.max_concurrent_claims as u32;
        match tokio::time::timeout(timeout, self.permits.acquire_many(all)).await {
            Ok(_) => Ok(()),
            Err(_) => Err(QueueError::Timeout(timeout)),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, ScoreRange};
    use std::sync::atomic::AtomicUsize;

    fn test_config() -> WorkQueueConfig {
        WorkQueueConfig::new()
            .with_namespace("test")
            .with_poll_interval(Duration::from_millis(1))
    }

    fn engine(registry: TaskRegistry) -> (Arc<MemoryStore>, WorkQueue) {
        let store = Arc::new(MemoryStore::new());
        let queue = WorkQueue::new(
            store.clone(),
            Arc::new(registry),
            test_config(),
            Settings::default(),
        );
        (store, queue)
    }

    fn in_a_while() -> DateTime<Utc> {
        Utc::now() + chrono::Duration::seconds(5)
    }

    #[tokio::test]
    async fn test_run_handles_enqueued_tasks() {
        let registry = TaskRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        registry.register_fn("Count", move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        let (_, queue) = engine(registry);

        for n in 0..3 {
            queue
                .enqueue(Task::new("Count").with_field("n", n))
                .await
                .unwrap();
        }

        let summary = queue.run_until(in_a_while()).await.unwrap();
        queue.wait_for_idle(Duration::from_secs(5)).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(summary.dispatched.get("Count"), Some(&3));
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.claimed, 0);
        assert_eq!(stats.completed, 3);
    }

    #[tokio::test]
    async fn test_run_on_empty_queue_ends_early() {
        let (_, queue) = engine(TaskRegistry::new());
        let started = Instant::now();

        let summary = queue.run_until(in_a_while()).await.unwrap();

        assert_eq!(summary.iterations, 1);
        assert_eq!(summary.total_dispatched(), 0);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_run_respects_concurrency_limit() {
        let registry = TaskRegistry::new();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (r, p) = (running.clone(), peak.clone());
        registry.register_fn("Slow", move |_| {
            let (running, peak) = (r.clone(), p.clone());
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        });
        let (_, queue) = engine(registry);

        for n in 0..10 {
            queue
                .enqueue(Task::new("Slow").with_field("n", n))
                .await
                .unwrap();
        }

        let summary = queue.run_until(in_a_while()).await.unwrap();
        queue.wait_for_idle(Duration::from_secs(5)).await.unwrap();

        assert_eq!(summary.total_dispatched(), 10);
        assert!(peak.load(Ordering::SeqCst) <= 4);
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_unknown_type_is_discarded() {
        let (store, queue) = engine(TaskRegistry::new());
        queue.enqueue(Task::new("Nobody")).await.unwrap();

        queue.run_until(in_a_while()).await.unwrap();
        queue.wait_for_idle(Duration::from_secs(5)).await.unwrap();

        assert_eq!(store.zcard("test:tasks").await.unwrap(), 0);
        assert_eq!(store.zcard("test:claims").await.unwrap(), 0);
        assert_eq!(queue.stats().await.unwrap().discarded, 1);
    }

    #[tokio::test]
    async fn test_failure_reschedules_with_backdated_score() {
        let registry = TaskRegistry::new();
        registry.register_fn("Flaky", |_| async { Err(anyhow::anyhow!("nope")) });
        let (store, queue) = engine(registry);
        let task = Task::new("Flaky");
        queue
            .leases()
            .move_to_claimed(&[task.clone()], now_millis())
            .await
            .unwrap();

        let before = now_millis();
        queue.handle(task.clone()).await;

        let entries = store
            .zrange_by_score("test:claims", ScoreRange::all(), None)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, task.key());
        let half_age = (queue.config().max_task_age.as_millis() as i64) / 2;
        assert!(entries[0].1 <= now_millis() - half_age);
        assert!(entries[0].1 >= before - half_age);
        assert_eq!(
            store.hget("test:attempts", task.key()).await.unwrap(),
            Some("1".to_string())
        );
    }

    #[tokio::test]
    async fn test_failure_at_limit_drops_task() {
        let registry = TaskRegistry::new();
        registry.register_fn("Flaky", |_| async { Err(anyhow::anyhow!("nope")) });
        let (store, queue) = engine(registry);
        let task = Task::new("Flaky").with_max_attempts(1);
        queue
            .leases()
            .move_to_claimed(&[task.clone()], now_millis())
            .await
            .unwrap();

        queue.handle(task.clone()).await;

        assert_eq!(store.zcard("test:claims").await.unwrap(), 0);
        assert_eq!(store.hget("test:attempts", task.key()).await.unwrap(), None);
        assert_eq!(queue.stats().await.unwrap().permanently_failed, 1);
    }

    #[tokio::test]
    async fn test_handler_panic_counts_as_failure() {
        let registry = TaskRegistry::new();
        registry.register_fn("Panics", |_| async {
            if true {
                panic!("handler blew up");
            }
            Ok(())
        });
        let (store, queue) = engine(registry);
        let task = Task::new("Panics");
        queue
            .leases()
            .move_to_claimed(&[task.clone()], now_millis())
            .await
            .unwrap();

        queue.handle(task.clone()).await;

        assert_eq!(store.zcard("test:claims").await.unwrap(), 1);
        assert_eq!(queue.stats().await.unwrap().failed, 1);
    }

    #[tokio::test]
    async fn test_claim_prefers_stale_claims() {
        let (store, queue) = engine(TaskRegistry::new());
        let stale = Task::new("Test").with_field("which", "stale");
        let fresh = Task::new("Test").with_field("which", "fresh");
        store
            .zadd("test:claims", &[(stale.to_member(), now_millis() - 3_000)])
            .await
            .unwrap();
        queue.enqueue(fresh.clone()).await.unwrap();

        let claimed = queue.claim_one_batch(4).await.unwrap();
        assert_eq!(claimed, vec![stale]);

        let claimed = queue.claim_one_batch(4).await.unwrap();
        assert_eq!(claimed, vec![fresh]);
        assert_eq!(store.zcard("test:tasks").await.unwrap(), 0);
        assert_eq!(store.zcard("test:claims").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_claim_returns_empty_when_lock_held() {
        let store = Arc::new(MemoryStore::new());
        let queue = WorkQueue::new(
            store.clone(),
            Arc::new(TaskRegistry::new()),
            test_config().with_lock(crate::config::LockConfig {
                max_attempts: 2,
                backoff_step: Duration::from_millis(1),
                jitter: Duration::ZERO,
                ..Default::default()
            }),
            Settings::default(),
        );
        queue.enqueue(Task::new("Test")).await.unwrap();
        store
            .hset("test:lock", "lock", &now_millis().to_string())
            .await
            .unwrap();

        assert!(queue.claim_one_batch(4).await.unwrap().is_empty());
        assert_eq!(store.zcard("test:tasks").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_wait_for_idle_times_out() {
        let registry = TaskRegistry::new();
        registry.register_fn("Sleepy", |_| async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(())
        });
        let (_, queue) = engine(registry);
        queue.enqueue(Task::new("Sleepy")).await.unwrap();

        let deadline = Utc::now() + chrono::Duration::milliseconds(50);
        queue.run_until(deadline).await.unwrap();

        assert_eq!(queue.in_flight(), 1);
        let result = queue.wait_for_idle(Duration::from_millis(10)).await;
        assert!(matches!(result, Err(QueueError::Timeout(_))));
    }

    #[test]
    fn test_queue_stats_success_rate() {
        let stats = QueueStats {
            completed: 3,
            failed: 1,
            ..Default::default()
        };
        assert!((stats.success_rate() - 75.0).abs() < f64::EPSILON);
        assert_eq!(QueueStats::default().success_rate(), 0.0);
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("static str");
        assert_eq!(panic_message(boxed.as_ref()), "static str");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
