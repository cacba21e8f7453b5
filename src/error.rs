//! Error types for workqueue operations.
//!
//! Defines error types for the major subsystems:
//! - Shared store access (Redis or in-process)
//! - Queue, lease and announcer operations
//! - Settings loading
//!
//! Handler failures are not represented here. Handlers return
//! `anyhow::Result<()>` and their errors never leave the engine.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while talking to the shared store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to connect to the store.
    #[error("Store connection failed: {0}")]
    ConnectionFailed(String),

    /// A Redis command failed.
    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    /// A stored value had an unexpected shape (e.g. `INCR` on a non-integer).
    #[error("Invalid value at '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Underlying store failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Failed to serialize or deserialize a task or message.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A set member could not be decoded into a task.
    #[error("Invalid task member '{member}': {reason}")]
    InvalidTask { member: String, reason: String },

    /// Publishing to the realtime channel failed.
    #[error("Realtime publish to '{channel}' failed: {reason}")]
    PublishFailed { channel: String, reason: String },

    /// Operation timed out.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors that can occur while loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value '{value}' for setting '{name}'")]
    InvalidValue { name: String, value: String },
}
