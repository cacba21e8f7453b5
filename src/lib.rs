//! workqueue: distributed at-least-once task queue over a shared store.
//!
//! This library provides a work queue whose pending and claimed tasks live in
//! sorted sets of a key-value store (Redis in production), so that any number
//! of short-lived processes can enqueue and run background tasks together.

// Core modules
pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod realtime;
pub mod store;

// Re-export commonly used types
pub use config::{Settings, WorkQueueConfig};
pub use error::{QueueError, SettingsError, StoreError};
pub use queue::{Announcer, Task, TaskHandler, TaskRegistry, WorkQueue};
