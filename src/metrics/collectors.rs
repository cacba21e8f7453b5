//! Metric recording facade for queue operations.
//!
//! `MetricsCollector` wraps the raw Prometheus metrics and keeps labeling
//! consistent. Every method is a no-op until `init_metrics()` has run, so
//! library code can record unconditionally.

use std::time::Duration;

use super::prometheus::{
    ANNOUNCE_BATCH_SIZE, CLAIMED_TASKS, HANDLER_DURATION, IN_FLIGHT_TASKS, LOCK_ACQUIRE_LATENCY,
    LOCK_ATTEMPTS, LOCK_HOLD_DURATION, PENDING_TASKS, REALTIME_MESSAGES, TASKS_COMPLETED,
    TASKS_DISCARDED, TASKS_ENQUEUED, TASKS_FAILED, TASKS_PERMANENTLY_FAILED, TASKS_PER_RUN,
    TASKS_PRUNED, TASKS_STOLEN,
};

fn success_label(success: bool) -> &'static str {
    if success {
        "true"
    } else {
        "false"
    }
}

/// Metrics collector for recording queue metrics.
///
/// # Example
///
/// ```ignore
/// use workqueue::metrics::{init_metrics, MetricsCollector};
///
/// init_metrics().expect("Failed to init metrics");
/// let collector = MetricsCollector::new();
/// collector.record_enqueued("SendRealtimeMessage");
/// ```
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    /// Create a new MetricsCollector instance.
    pub fn new() -> Self {
        Self
    }

    pub fn record_enqueued(&self, task_type: &str) {
        if let Some(counter) = TASKS_ENQUEUED.get() {
            counter.with_label_values(&[task_type]).inc();
        }
    }

    /// Record a successful handler run.
    pub fn record_completed(&self, task_type: &str, duration: Duration) {
        if let Some(counter) = TASKS_COMPLETED.get() {
            counter.with_label_values(&[task_type]).inc();
        }
        self.record_handler_duration(task_type, true, duration);
    }

    /// Record a failed handler run (one attempt).
    pub fn record_failed(&self, task_type: &str) {
        if let Some(counter) = TASKS_FAILED.get() {
            counter.with_label_values(&[task_type]).inc();
        }
    }

    pub fn record_permanently_failed(&self, task_type: &str) {
        if let Some(counter) = TASKS_PERMANENTLY_FAILED.get() {
            counter.with_label_values(&[task_type]).inc();
        }
    }

    pub fn record_discarded(&self, task_type: &str) {
        if let Some(counter) = TASKS_DISCARDED.get() {
            counter.with_label_values(&[task_type]).inc();
        }
    }

    /// Record handler duration, labeled by outcome.
    pub fn record_handler_duration(&self, task_type: &str, success: bool, duration: Duration) {
        if let Some(histogram) = HANDLER_DURATION.get() {
            histogram
                .with_label_values(&[task_type, success_label(success)])
                .observe(duration.as_secs_f64());
        }

        tracing::trace!(
            task_type = task_type,
            success = success,
            duration_ms = duration.as_millis() as u64,
            "Recorded handler duration"
        );
    }

    /// Record entries pruned from a set.
    pub fn record_pruned(&self, set: &str, count: usize) {
        if count == 0 {
            return;
        }
        if let Some(counter) = TASKS_PRUNED.get() {
            counter.with_label_values(&[set]).inc_by(count as f64);
        }
    }

    pub fn record_stolen(&self, count: usize) {
        if count == 0 {
            return;
        }
        if let Some(counter) = TASKS_STOLEN.get() {
            counter.inc_by(count as f64);
        }
    }

    /// Record how many tasks of one type a run dispatched.
    pub fn record_tasks_per_run(&self, task_type: &str, count: usize) {
        if let Some(histogram) = TASKS_PER_RUN.get() {
            histogram
                .with_label_values(&[task_type])
                .observe(count as f64);
        }
    }

    /// Update the pending and claimed set gauges.
    pub fn update_queue_sizes(&self, pending: usize, claimed: usize) {
        if let Some(gauge) = PENDING_TASKS.get() {
            gauge.set(pending as f64);
        }
        if let Some(gauge) = CLAIMED_TASKS.get() {
            gauge.set(claimed as f64);
        }

        tracing::trace!(pending = pending, claimed = claimed, "Updated queue size metrics");
    }

    pub fn inc_in_flight(&self) {
        if let Some(gauge) = IN_FLIGHT_TASKS.get() {
            gauge.inc();
        }
    }

    pub fn dec_in_flight(&self) {
        if let Some(gauge) = IN_FLIGHT_TASKS.get() {
            gauge.dec();
        }
    }

    /// Record one acquisition attempt on a lock.
    pub fn record_lock_attempt(&self, key: &str, success: bool) {
        if let Some(counter) = LOCK_ATTEMPTS.get() {
            counter
                .with_label_values(&[key, success_label(success)])
                .inc();
        }
    }

    /// Record the total time spent acquiring (or giving up on) a lock.
    pub fn record_lock_acquire(&self, key: &str, success: bool, latency: Duration) {
        if let Some(histogram) = LOCK_ACQUIRE_LATENCY.get() {
            histogram
                .with_label_values(&[key, success_label(success)])
                .observe(latency.as_secs_f64());
        }
    }

    pub fn record_lock_hold(&self, key: &str, held: Duration) {
        if let Some(histogram) = LOCK_HOLD_DURATION.get() {
            histogram
                .with_label_values(&[key])
                .observe(held.as_secs_f64());
        }
    }

    /// Record a realtime send; `mode` is "direct" or "batched".
    pub fn record_realtime(&self, mode: &str) {
        if let Some(counter) = REALTIME_MESSAGES.get() {
            counter.with_label_values(&[mode]).inc();
        }
    }

    pub fn record_batch_flush(&self, size: usize) {
        if let Some(histogram) = ANNOUNCE_BATCH_SIZE.get() {
            histogram.observe(size as f64);
        }

        tracing::trace!(size = size, "Recorded announce batch flush");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{export_metrics, init_metrics};

    fn ensure_metrics_init() {
        let _ = init_metrics();
    }

    #[test]
    fn test_metrics_collector_new() {
        let collector = MetricsCollector::new();
        assert!(std::mem::size_of_val(&collector) == 0);
    }

    #[test]
    fn test_success_label() {
        assert_eq!(success_label(true), "true");
        assert_eq!(success_label(false), "false");
    }

    #[test]
    fn test_record_task_lifecycle() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.record_enqueued("Test");
        collector.record_completed("Test", Duration::from_millis(12));
        collector.record_failed("Test");
        collector.record_handler_duration("Test", false, Duration::from_millis(3));
        collector.record_permanently_failed("Test");
        collector.record_discarded("Unknown");
        collector.record_tasks_per_run("Test", 3);

        let exported = export_metrics();
        assert!(exported.contains("workqueue_tasks_completed_total"));
        assert!(exported.contains("workqueue_handler_duration_seconds"));
    }

    #[test]
    fn test_record_queue_and_lock_metrics() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.update_queue_sizes(4, 2);
        collector.inc_in_flight();
        collector.dec_in_flight();
        collector.record_pruned("pending", 3);
        collector.record_pruned("claimed", 0);
        collector.record_stolen(1);
        collector.record_lock_attempt("workqueue:lock", true);
        collector.record_lock_acquire("workqueue:lock", true, Duration::from_millis(1));
        collector.record_lock_hold("workqueue:lock", Duration::from_millis(5));
        collector.record_realtime("batched");
        collector.record_batch_flush(8);
    }
}
