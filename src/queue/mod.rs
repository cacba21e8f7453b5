//! Distributed at-least-once work queue over a shared store.
//!
//! This module provides the queue itself and its building blocks:
//!
//! - **Task**: JSON work item whose canonical form doubles as its lease key
//! - **Lock**: advisory mutual exclusion stored in a hash field
//! - **LeaseStore**: pending and claimed sorted sets scored by timestamp
//! - **TaskRegistry**: task type to handler mapping
//! - **WorkQueue**: claim loop, bounded dispatch and retry policy
//! - **Announcer**: realtime sends, optionally coalesced into batches
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │   Producer   │
//!                      │  (API/CLI)   │
//!                      └──────┬───────┘
//!                             │ enqueue (score = now)
//!                      ┌──────▼───────┐
//!                      │   pending    │
//!                      │ (sorted set) │
//!                      └──────┬───────┘
//!                             │ claim under lock
//!                      ┌──────▼───────┐  stale claims
//!                      │   claimed    │◄─────────────┐
//!                      │ (sorted set) │──────────────┘
//!                      └──────┬───────┘
//!         ┌───────────────────┼───────────────────┐
//!         ▼                   ▼                   ▼
//!    ┌─────────┐         ┌─────────┐         ┌─────────┐
//!    │ Engine 1│         │ Engine 2│         │ Engine N│
//!    └─────────┘         └─────────┘         └─────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use workqueue::config::{Settings, WorkQueueConfig};
//! use workqueue::queue::{Task, TaskRegistry, WorkQueue};
//! use workqueue::store::MemoryStore;
//!
//! let registry = Arc::new(TaskRegistry::new());
//! registry.register_fn("Greet", |task| async move {
//!     println!("hello {}", task.field("name").cloned().unwrap_or_default());
//!     Ok(())
//! });
//!
//! let queue = WorkQueue::new(
//!     Arc::new(MemoryStore::new()),
//!     registry,
//!     WorkQueueConfig::default(),
//!     Settings::default(),
//! );
//! queue.enqueue(Task::new("Greet").with_field("name", "world")).await?;
//! queue.run_until(chrono::Utc::now() + chrono::Duration::seconds(1)).await?;
//! ```
//!
//! # Reliability Features
//!
//! - **At-least-once**: a claim is only removed after its handler returns
//! - **Crash recovery**: claims older than the task deadline are stolen
//! - **Bounded retries**: attempts are counted next to the lease; tasks are
//!   dropped once they reach their limit
//! - **Age pruning**: entries older than the maximum task age are discarded

pub mod announce;
pub mod engine;
pub mod lease;
pub mod lock;
pub mod registry;
pub mod task;

use std::time::Duration;

use rand::RngExt;

pub use announce::{register_realtime_handler, Announcer, BatchMessage};
pub use engine::{QueueStats, RunSummary, WorkQueue};
pub use lease::{LeaseSet, LeaseStore};
pub use lock::Lock;
pub use registry::{HandlerResult, TaskHandler, TaskRegistry};
pub use task::{Task, SEND_REALTIME_MESSAGE};

/// Store keys used by one queue namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    /// Sorted set of tasks waiting to be claimed.
    pub pending: String,
    /// Sorted set of claimed tasks, scored by claim time.
    pub claimed: String,
    /// Hash holding the claim lock.
    pub lock: String,
    /// Hash of task key to failed attempts.
    pub attempts: String,
    /// Hash of announce id to queued realtime message.
    pub announce_batch: String,
    pub announce_id: String,
    pub announce_last_flush: String,
    pub announce_lock: String,
}

impl QueueKeys {
    pub fn new(namespace: &str) -> Self {
        Self {
            pending: format!("{namespace}:tasks"),
            claimed: format!("{namespace}:claims"),
            lock: format!("{namespace}:lock"),
            attempts: format!("{namespace}:attempts"),
            announce_batch: format!("{namespace}:announce:batch"),
            announce_id: format!("{namespace}:announce:id"),
            announce_last_flush: format!("{namespace}:announce:last_flush"),
            announce_lock: format!("{namespace}:announce:lock"),
        }
    }
}

/// `attempt * step` plus a random jitter in `[0, jitter]`.
pub(crate) fn backoff_delay(attempt: u32, step: Duration, jitter: Duration) -> Duration {
    let jitter_ms = jitter.as_millis() as u64;
    let extra = if jitter_ms == 0 {
        0
    } else {
        rand::rng().random_range(0..=jitter_ms)
    };
    step.saturating_mul(attempt) + Duration::from_millis(extra)
}
