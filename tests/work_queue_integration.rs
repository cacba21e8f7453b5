//! Integration tests for the work queue.
//!
//! Engines run end-to-end against the in-process store. The Redis test at
//! the bottom needs a server.
//! Run it with: REDIS_URL=redis://127.0.0.1:6379 cargo test --test work_queue_integration -- --ignored

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;
use workqueue::config::{Settings, WorkQueueConfig, INSTALL_REALTIME_CHANNEL};
use workqueue::queue::{register_realtime_handler, Announcer, Task, TaskRegistry, WorkQueue};
use workqueue::realtime::RecordingPublisher;
use workqueue::store::{now_millis, MemoryStore, RedisStore, Store};

fn test_config() -> WorkQueueConfig {
    WorkQueueConfig::new()
        .with_namespace("it")
        .with_poll_interval(Duration::from_millis(2))
}

fn create_queue(store: Arc<dyn Store>, registry: Arc<TaskRegistry>) -> WorkQueue {
    WorkQueue::new(store, registry, test_config(), Settings::default())
}

fn deadline_in(seconds: i64) -> chrono::DateTime<Utc> {
    Utc::now() + chrono::Duration::seconds(seconds)
}

/// Registers `task_type` with a handler recording the instant of every call,
/// keyed by the task's `n` field.
fn recording_registry(task_type: &str) -> (Arc<TaskRegistry>, Arc<Mutex<HashMap<i64, Vec<Instant>>>>) {
    let registry = Arc::new(TaskRegistry::new());
    let calls: Arc<Mutex<HashMap<i64, Vec<Instant>>>> = Arc::new(Mutex::new(HashMap::new()));
    let recorded = calls.clone();
    registry.register_fn(task_type, move |task| {
        let recorded = recorded.clone();
        async move {
            let n = task.field("n").and_then(|v| v.as_i64()).unwrap_or(-1);
            recorded
                .lock()
                .unwrap()
                .entry(n)
                .or_default()
                .push(Instant::now());
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(())
        }
    });
    (registry, calls)
}

#[tokio::test]
async fn test_stale_claim_is_stolen_in_one_iteration() {
    let store = Arc::new(MemoryStore::new());
    let (registry, calls) = recording_registry("Work");
    let queue = create_queue(store.clone(), registry);

    // Claimed by a process that died 1s past the task deadline.
    let task = Task::new("Work").with_field("n", 1);
    let abandoned_at = now_millis() - queue.config().task_deadline.as_millis() as i64 - 1000;
    store
        .zadd("it:claims", &[(task.to_member(), abandoned_at)])
        .await
        .unwrap();

    let summary = queue.run_until(deadline_in(5)).await.unwrap();
    queue.wait_for_idle(Duration::from_secs(5)).await.unwrap();

    assert_eq!(summary.total_dispatched(), 1);
    assert_eq!(calls.lock().unwrap().get(&1).map(Vec::len), Some(1));
    assert_eq!(store.zcard("it:claims").await.unwrap(), 0);
}

#[tokio::test]
async fn test_overlapping_engines_run_each_task_once() {
    let store = Arc::new(MemoryStore::new());
    let (registry, calls) = recording_registry("Work");
    let first = create_queue(store.clone(), registry.clone());
    let second = create_queue(store.clone(), registry);

    for n in 0..20 {
        first
            .enqueue(Task::new("Work").with_field("n", n))
            .await
            .unwrap();
    }

    let (a, b) = tokio::join!(first.run_until(deadline_in(10)), second.run_until(deadline_in(10)));
    first.wait_for_idle(Duration::from_secs(5)).await.unwrap();
    second.wait_for_idle(Duration::from_secs(5)).await.unwrap();

    assert_eq!(a.unwrap().total_dispatched() + b.unwrap().total_dispatched(), 20);
    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 20);
    assert!(calls.values().all(|times| times.len() == 1));
    assert_eq!(store.zcard("it:tasks").await.unwrap(), 0);
    assert_eq!(store.zcard("it:claims").await.unwrap(), 0);
}

#[tokio::test]
async fn test_failing_task_stops_at_max_attempts_with_backoff() {
    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(TaskRegistry::new());
    let calls: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
    let recorded = calls.clone();
    registry.register_fn("AlwaysFails", move |_| {
        let recorded = recorded.clone();
        async move {
            recorded.lock().unwrap().push(Instant::now());
            Err(anyhow::anyhow!("always fails"))
        }
    });
    let queue = create_queue(store.clone(), registry);
    let task = Task::new("AlwaysFails").with_max_attempts(3);
    queue.enqueue(task.clone()).await.unwrap();

    queue.run_until(deadline_in(10)).await.unwrap();
    queue.wait_for_idle(Duration::from_secs(5)).await.unwrap();

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 3);
    // The n-th retry waits at least n * 100ms after the n-th failure.
    for (n, pair) in calls.windows(2).enumerate() {
        let gap = pair[1].duration_since(pair[0]);
        assert!(
            gap >= Duration::from_millis(100 * (n as u64 + 1)),
            "retry {} came after {:?}",
            n + 1,
            gap
        );
    }

    assert_eq!(store.zcard("it:tasks").await.unwrap(), 0);
    assert_eq!(store.zcard("it:claims").await.unwrap(), 0);
    assert_eq!(store.hget("it:attempts", task.key()).await.unwrap(), None);
    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.failed, 3);
    assert_eq!(stats.permanently_failed, 1);
}

#[tokio::test]
async fn test_task_recovering_on_retry_completes() {
    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(TaskRegistry::new());
    let calls = Arc::new(Mutex::new(0u32));
    let counter = calls.clone();
    registry.register_fn("FailsOnce", move |task| {
        let counter = counter.clone();
        async move {
            *counter.lock().unwrap() += 1;
            if task.attempts() == 0 {
                anyhow::bail!("first attempt fails");
            }
            Ok(())
        }
    });
    let queue = create_queue(store.clone(), registry);
    queue.enqueue(Task::new("FailsOnce")).await.unwrap();

    queue.run_until(deadline_in(10)).await.unwrap();
    queue.wait_for_idle(Duration::from_secs(5)).await.unwrap();

    assert_eq!(*calls.lock().unwrap(), 2);
    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.claimed, 0);
}

#[tokio::test]
async fn test_slow_failure_is_retried_once_after_backoff() {
    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(TaskRegistry::new());
    let deadline = Duration::from_millis(500);
    let starts: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
    let failed_at: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
    let (recorded_starts, recorded_failure) = (starts.clone(), failed_at.clone());
    registry.register_fn("Slow", move |task| {
        let starts = recorded_starts.clone();
        let failed_at = recorded_failure.clone();
        async move {
            starts.lock().unwrap().push(Instant::now());
            if task.attempts() > 0 {
                return Ok(());
            }
            // Fails just inside the claim deadline.
            tokio::time::sleep(deadline - Duration::from_millis(50)).await;
            *failed_at.lock().unwrap() = Some(Instant::now());
            Err(anyhow::anyhow!("slow failure"))
        }
    });
    let queue = WorkQueue::new(
        store.clone(),
        registry,
        test_config().with_task_deadline(deadline),
        Settings::default(),
    );
    queue.enqueue(Task::new("Slow")).await.unwrap();

    queue.run_until(deadline_in(5)).await.unwrap();
    queue.wait_for_idle(Duration::from_secs(5)).await.unwrap();

    let starts = starts.lock().unwrap();
    assert_eq!(starts.len(), 2);
    let failed_at = failed_at.lock().unwrap().expect("first attempt failed");
    let gap = starts[1].duration_since(failed_at);
    assert!(gap >= Duration::from_millis(100), "retry came after {:?}", gap);
    assert_eq!(store.zcard("it:claims").await.unwrap(), 0);
}

#[tokio::test]
async fn test_expired_claim_is_pruned_not_stolen() {
    let store = Arc::new(MemoryStore::new());
    let (registry, calls) = recording_registry("Work");
    let queue = create_queue(store.clone(), registry);

    let expired = Task::new("Work").with_field("n", 1);
    let too_old = now_millis() - queue.config().max_task_age.as_millis() as i64 - 1000;
    store
        .zadd("it:claims", &[(expired.to_member(), too_old)])
        .await
        .unwrap();

    let summary = queue.run_until(deadline_in(5)).await.unwrap();
    queue.wait_for_idle(Duration::from_secs(5)).await.unwrap();

    assert_eq!(summary.total_dispatched(), 0);
    assert!(calls.lock().unwrap().is_empty());
    assert_eq!(store.zcard("it:claims").await.unwrap(), 0);
}

#[tokio::test]
async fn test_expired_pending_task_is_pruned_not_run() {
    let store = Arc::new(MemoryStore::new());
    let (registry, calls) = recording_registry("Work");
    let queue = create_queue(store.clone(), registry);

    let expired = Task::new("Work").with_field("n", 1);
    let too_old = now_millis() - queue.config().max_task_age.as_millis() as i64 - 1000;
    store
        .zadd("it:tasks", &[(expired.to_member(), too_old)])
        .await
        .unwrap();
    queue
        .enqueue(Task::new("Work").with_field("n", 2))
        .await
        .unwrap();

    queue.run_until(deadline_in(5)).await.unwrap();
    queue.wait_for_idle(Duration::from_secs(5)).await.unwrap();

    let calls = calls.lock().unwrap();
    assert!(!calls.contains_key(&1));
    assert_eq!(calls.get(&2).map(Vec::len), Some(1));
    assert_eq!(store.zcard("it:tasks").await.unwrap(), 0);
}

#[tokio::test]
async fn test_batched_announcements_arrive_in_order() {
    let store = Arc::new(MemoryStore::new());
    let publisher = RecordingPublisher::new();
    let registry = Arc::new(TaskRegistry::new());
    register_realtime_handler(&registry, Arc::new(publisher.clone()), INSTALL_REALTIME_CHANNEL);
    let settings = Settings {
        batched_realtime: true,
        ..Default::default()
    };
    let queue = WorkQueue::new(store.clone(), registry, test_config(), settings);
    let announcer = Announcer::new(queue.clone(), Arc::new(publisher.clone()));

    // A recent flush holds the batch open.
    store
        .set("it:announce:last_flush", &now_millis().to_string(), None)
        .await
        .unwrap();
    for n in 0..3 {
        announcer.send_realtime(json!({"n": n})).await.unwrap();
    }
    assert!(announcer.flush_now().await.unwrap());

    queue.run_until(deadline_in(5)).await.unwrap();
    queue.wait_for_idle(Duration::from_secs(5)).await.unwrap();

    assert_eq!(
        publisher.published(),
        vec![(
            INSTALL_REALTIME_CHANNEL.to_string(),
            json!({"type": "batch", "batch": [{"n": 0}, {"n": 1}, {"n": 2}]})
        )]
    );
    assert_eq!(store.hlen("it:announce:batch").await.unwrap(), 0);
}

#[tokio::test]
#[ignore] // Run with: REDIS_URL=redis://127.0.0.1:6379 cargo test --test work_queue_integration -- --ignored
async fn test_redis_end_to_end() {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let store: Arc<dyn Store> = Arc::new(
        RedisStore::connect(&url)
            .await
            .expect("Redis must be reachable for this test"),
    );
    let (registry, calls) = recording_registry("Work");
    let namespace = format!("it-{}", uuid::Uuid::new_v4());
    let queue = WorkQueue::new(
        store.clone(),
        registry,
        test_config().with_namespace(namespace.clone()),
        Settings::default(),
    );

    for n in 0..5 {
        queue
            .enqueue(Task::new("Work").with_field("n", n))
            .await
            .unwrap();
    }
    queue.run_until(deadline_in(10)).await.unwrap();
    queue.wait_for_idle(Duration::from_secs(5)).await.unwrap();

    assert_eq!(calls.lock().unwrap().len(), 5);
    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.claimed, 0);
}
