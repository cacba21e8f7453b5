//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by workqueue and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Latency buckets in seconds, 1ms to 10s.
pub const LATENCY_BUCKETS: [f64; 13] = [
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Global Prometheus registry for all workqueue metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Tasks enqueued by producers, labeled by task type.
pub static TASKS_ENQUEUED: OnceLock<CounterVec> = OnceLock::new();

/// Tasks whose handler succeeded, labeled by task type.
pub static TASKS_COMPLETED: OnceLock<CounterVec> = OnceLock::new();

/// Handler failures (every attempt), labeled by task type.
pub static TASKS_FAILED: OnceLock<CounterVec> = OnceLock::new();

/// Tasks dropped after exhausting their attempts, labeled by task type.
pub static TASKS_PERMANENTLY_FAILED: OnceLock<CounterVec> = OnceLock::new();

/// Tasks discarded because no handler is registered, labeled by task type.
pub static TASKS_DISCARDED: OnceLock<CounterVec> = OnceLock::new();

/// Entries pruned for age, labeled by set (pending/claimed).
pub static TASKS_PRUNED: OnceLock<CounterVec> = OnceLock::new();

/// Abandoned claims taken over by another claimer.
pub static TASKS_STOLEN: OnceLock<Counter> = OnceLock::new();

/// Handler duration in seconds, labeled by task type and success.
pub static HANDLER_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Tasks dispatched per `run_until` call, labeled by task type.
pub static TASKS_PER_RUN: OnceLock<HistogramVec> = OnceLock::new();

/// Size of the pending set at the last claim.
pub static PENDING_TASKS: OnceLock<Gauge> = OnceLock::new();

/// Size of the claimed set at the last claim.
pub static CLAIMED_TASKS: OnceLock<Gauge> = OnceLock::new();

/// Handlers currently running in this process.
pub static IN_FLIGHT_TASKS: OnceLock<Gauge> = OnceLock::new();

/// Lock acquisition attempts, labeled by lock key and success.
pub static LOCK_ATTEMPTS: OnceLock<CounterVec> = OnceLock::new();

/// Time to acquire (or give up on) a lock, labeled by lock key and success.
pub static LOCK_ACQUIRE_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Time a lock was held, labeled by lock key.
pub static LOCK_HOLD_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Realtime messages sent, labeled by mode (direct/batched).
pub static REALTIME_MESSAGES: OnceLock<CounterVec> = OnceLock::new();

/// Number of messages per flushed announce batch.
pub static ANNOUNCE_BATCH_SIZE: OnceLock<Histogram> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// This function should be called once at application startup. It creates all
/// metric instances with appropriate labels and buckets, and registers them
/// with the global Prometheus registry. Later calls leave the first set of
/// metrics in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    // Task lifecycle
    let tasks_enqueued = CounterVec::new(
        Opts::new("workqueue_tasks_enqueued_total", "Total tasks enqueued"),
        &["type"],
    )?;

    let tasks_completed = CounterVec::new(
        Opts::new("workqueue_tasks_completed_total", "Total tasks completed"),
        &["type"],
    )?;

    let tasks_failed = CounterVec::new(
        Opts::new("workqueue_tasks_failed_total", "Total handler failures"),
        &["type"],
    )?;

    let tasks_permanently_failed = CounterVec::new(
        Opts::new(
            "workqueue_tasks_permanently_failed_total",
            "Total tasks dropped after exhausting attempts",
        ),
        &["type"],
    )?;

    let tasks_discarded = CounterVec::new(
        Opts::new(
            "workqueue_tasks_discarded_total",
            "Total tasks discarded for lack of a handler",
        ),
        &["type"],
    )?;

    let tasks_pruned = CounterVec::new(
        Opts::new("workqueue_tasks_pruned_total", "Total entries pruned for age"),
        &["set"],
    )?;

    let tasks_stolen = Counter::new(
        "workqueue_tasks_stolen_total",
        "Total abandoned claims stolen",
    )?;

    let handler_duration = HistogramVec::new(
        HistogramOpts::new(
            "workqueue_handler_duration_seconds",
            "Task handler duration in seconds",
        )
        .buckets(LATENCY_BUCKETS.to_vec()),
        &["type", "success"],
    )?;

    let tasks_per_run = HistogramVec::new(
        HistogramOpts::new(
            "workqueue_tasks_per_run",
            "Tasks dispatched per engine run",
        )
        .buckets(vec![1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0]),
        &["type"],
    )?;

    // Queue depth
    let pending_tasks = Gauge::new("workqueue_pending_tasks", "Entries in the pending set")?;
    let claimed_tasks = Gauge::new("workqueue_claimed_tasks", "Entries in the claimed set")?;
    let in_flight_tasks = Gauge::new(
        "workqueue_in_flight_tasks",
        "Handlers currently running in this process",
    )?;

    // Lock
    let lock_attempts = CounterVec::new(
        Opts::new("workqueue_lock_attempts_total", "Lock acquisition attempts"),
        &["key", "success"],
    )?;

    let lock_acquire_latency = HistogramVec::new(
        HistogramOpts::new(
            "workqueue_lock_acquire_seconds",
            "Time spent acquiring a lock",
        )
        .buckets(LATENCY_BUCKETS.to_vec()),
        &["key", "success"],
    )?;

    let lock_hold_duration = HistogramVec::new(
        HistogramOpts::new("workqueue_lock_hold_seconds", "Time a lock was held")
            .buckets(LATENCY_BUCKETS.to_vec()),
        &["key"],
    )?;

    // Realtime
    let realtime_messages = CounterVec::new(
        Opts::new("workqueue_realtime_messages_total", "Realtime messages sent"),
        &["mode"],
    )?;

    let announce_batch_size = Histogram::with_opts(
        HistogramOpts::new(
            "workqueue_announce_batch_size",
            "Messages per flushed announce batch",
        )
        .buckets(vec![1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0]),
    )?;

    // Register all metrics with the registry
    registry.register(Box::new(tasks_enqueued.clone()))?;
    registry.register(Box::new(tasks_completed.clone()))?;
    registry.register(Box::new(tasks_failed.clone()))?;
    registry.register(Box::new(tasks_permanently_failed.clone()))?;
    registry.register(Box::new(tasks_discarded.clone()))?;
    registry.register(Box::new(tasks_pruned.clone()))?;
    registry.register(Box::new(tasks_stolen.clone()))?;
    registry.register(Box::new(handler_duration.clone()))?;
    registry.register(Box::new(tasks_per_run.clone()))?;
    registry.register(Box::new(pending_tasks.clone()))?;
    registry.register(Box::new(claimed_tasks.clone()))?;
    registry.register(Box::new(in_flight_tasks.clone()))?;
    registry.register(Box::new(lock_attempts.clone()))?;
    registry.register(Box::new(lock_acquire_latency.clone()))?;
    registry.register(Box::new(lock_hold_duration.clone()))?;
    registry.register(Box::new(realtime_messages.clone()))?;
    registry.register(Box::new(announce_batch_size.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = TASKS_ENQUEUED.set(tasks_enqueued);
    let _ = TASKS_COMPLETED.set(tasks_completed);
    let _ = TASKS_FAILED.set(tasks_failed);
    let _ = TASKS_PERMANENTLY_FAILED.set(tasks_permanently_failed);
    let _ = TASKS_DISCARDED.set(tasks_discarded);
    let _ = TASKS_PRUNED.set(tasks_pruned);
    let _ = TASKS_STOLEN.set(tasks_stolen);
    let _ = HANDLER_DURATION.set(handler_duration);
    let _ = TASKS_PER_RUN.set(tasks_per_run);
    let _ = PENDING_TASKS.set(pending_tasks);
    let _ = CLAIMED_TASKS.set(claimed_tasks);
    let _ = IN_FLIGHT_TASKS.set(in_flight_tasks);
    let _ = LOCK_ATTEMPTS.set(lock_attempts);
    let _ = LOCK_ACQUIRE_LATENCY.set(lock_acquire_latency);
    let _ = LOCK_HOLD_DURATION.set(lock_hold_duration);
    let _ = REALTIME_MESSAGES.set(realtime_messages);
    let _ = ANNOUNCE_BATCH_SIZE.set(announce_batch_size);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// If the registry has not been initialized or encoding fails, returns a
/// comment line describing the problem instead.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
