//! Metrics module for Prometheus-based monitoring.
//!
//! The queue reports counters (labeled by task type, lock key, success),
//! histograms with buckets spanning 1ms to 10s, and gauges for the current
//! pending and claimed set sizes.
//!
//! # Example
//!
//! ```ignore
//! use workqueue::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//! let collector = MetricsCollector::new();
//! collector.record_enqueued("SendRealtimeMessage");
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use self::collectors::MetricsCollector;
pub use self::prometheus::{export_metrics, init_metrics, LATENCY_BUCKETS, REGISTRY};
