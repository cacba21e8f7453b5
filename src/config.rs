//! Queue configuration and runtime settings.
//!
//! [`WorkQueueConfig`] carries the tuning constants of the engine, the lock
//! and the announcer. [`Settings`] carries the three optional flags read
//! when an engine is constructed: debug logging, a poll-interval override
//! and batched realtime sends.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::SettingsError;

/// Default number of tasks that may be in flight per engine instance.
pub const DEFAULT_MAX_CONCURRENT_CLAIMS: usize = 4;

/// Default delay between claim attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Age after which a claim is considered abandoned and may be stolen.
pub const DEFAULT_TASK_DEADLINE: Duration = Duration::from_millis(2000);

/// Age after which pending or claimed entries are pruned.
pub const DEFAULT_MAX_TASK_AGE: Duration = Duration::from_secs(5 * 60);

/// Default number of handler invocations before a task is dropped.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Per-attempt retry backoff step.
pub const DEFAULT_BACKOFF_STEP: Duration = Duration::from_millis(100);

/// Upper bound of the random jitter added to every backoff.
pub const DEFAULT_BACKOFF_JITTER: Duration = Duration::from_millis(50);

/// Channel every realtime message is published on.
pub const INSTALL_REALTIME_CHANNEL: &str = "install_realtime";

const ENV_DEBUG: &str = "WORKQUEUE_DEBUG";
const ENV_POLL_INTERVAL_MS: &str = "WORKQUEUE_POLL_INTERVAL_MS";
const ENV_BATCHED_REALTIME: &str = "WORKQUEUE_BATCHED_REALTIME";

/// Configuration for the store-backed lock.
#[derive(Debug, Clone, PartialEq)]
pub struct LockConfig {
    /// Acquisition attempts before the caller's fallback is returned.
    pub max_attempts: u32,
    /// Longest a holder may keep the lock; also the key's expiration.
    pub max_hold: Duration,
    /// Sleep per failed attempt (multiplied by the attempt number).
    pub backoff_step: Duration,
    /// Upper bound of the random jitter added to each sleep.
    pub jitter: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            max_hold: Duration::from_secs(5),
            backoff_step: DEFAULT_BACKOFF_STEP,
            jitter: DEFAULT_BACKOFF_JITTER,
        }
    }
}

/// Configuration for realtime batching.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnounceConfig {
    /// Longest a message may wait in the batch.
    pub hold_time: Duration,
    /// Batch size that triggers a flush regardless of the hold time.
    pub max_batch_size: usize,
    /// Realtime channel name.
    pub channel: String,
}

impl Default for AnnounceConfig {
    fn default() -> Self {
        Self {
            hold_time: Duration::from_millis(1000),
            max_batch_size: 8,
            channel: INSTALL_REALTIME_CHANNEL.to_string(),
        }
    }
}

/// Configuration for a [`WorkQueue`](crate::queue::WorkQueue) engine.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkQueueConfig {
    /// Key prefix for every store key the queue touches.
    pub namespace: String,
    /// Ceiling on concurrently running handlers.
    pub max_concurrent_claims: usize,
    /// Delay between loop iterations.
    pub poll_interval: Duration,
    /// Claims older than this can be stolen.
    pub task_deadline: Duration,
    /// Entries older than this are pruned instead of claimed.
    pub max_task_age: Duration,
    /// Attempts used for tasks that do not carry their own limit.
    pub default_max_attempts: u32,
    /// Retry backoff step (multiplied by the attempt count).
    pub retry_backoff_step: Duration,
    /// Upper bound of the retry jitter.
    pub retry_jitter: Duration,
    pub lock: LockConfig,
    pub announce: AnnounceConfig,
}

impl Default for WorkQueueConfig {
    fn default() -> Self {
        Self {
            namespace: "workqueue".to_string(),
            max_concurrent_claims: DEFAULT_MAX_CONCURRENT_CLAIMS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            task_deadline: DEFAULT_TASK_DEADLINE,
            max_task_age: DEFAULT_MAX_TASK_AGE,
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff_step: DEFAULT_BACKOFF_STEP,
            retry_jitter: DEFAULT_BACKOFF_JITTER,
            lock: LockConfig::default(),
            announce: AnnounceConfig::default(),
        }
    }
}

impl WorkQueueConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the key namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Sets the in-flight ceiling.
    pub fn with_max_concurrent_claims(mut self, max: usize) -> Self {
        self.max_concurrent_claims = max;
        self
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the claim deadline.
    pub fn with_task_deadline(mut self, deadline: Duration) -> Self {
        self.task_deadline = deadline;
        self
    }

    /// Sets the maximum task age.
    pub fn with_max_task_age(mut self, age: Duration) -> Self {
        self.max_task_age = age;
        self
    }

    /// Sets the default maximum attempts.
    pub fn with_default_max_attempts(mut self, attempts: u32) -> Self {
        self.default_max_attempts = attempts;
        self
    }

    /// Sets the lock configuration.
    pub fn with_lock(mut self, lock: LockConfig) -> Self {
        self.lock = lock;
        self
    }

    /// Sets the announcer configuration.
    pub fn with_announce(mut self, announce: AnnounceConfig) -> Self {
        self.announce = announce;
        self
    }

    /// Applies the overrides carried by `settings`.
    pub fn apply_settings(mut self, settings: &Settings) -> Self {
        if let Some(ms) = settings.poll_interval_ms {
            self.poll_interval = Duration::from_millis(ms);
        }
        self
    }
}

/// Optional flags read at engine construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct Settings {
    /// Emit per-iteration and per-task debug logs.
    pub debug: bool,
    /// Poll interval override in milliseconds.
    pub poll_interval_ms: Option<u64>,
    /// Route realtime messages through the batching announcer.
    pub batched_realtime: bool,
}

impl Settings {
    /// Loads settings from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Parses settings from a YAML document. Missing fields take defaults.
    pub fn from_yaml_str(contents: &str) -> Result<Self, SettingsError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Reads settings from `WORKQUEUE_*` environment variables.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads settings through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(value) = lookup(ENV_DEBUG) {
            settings.debug = parse_flag(ENV_DEBUG, &value)?;
        }
        if let Some(value) = lookup(ENV_POLL_INTERVAL_MS) {
            let ms = value
                .trim()
                .parse::<u64>()
                .map_err(|_| SettingsError::InvalidValue {
                    name: ENV_POLL_INTERVAL_MS.to_string(),
                    value: value.clone(),
                })?;
            settings.poll_interval_ms = Some(ms);
        }
        if let Some(value) = lookup(ENV_BATCHED_REALTIME) {
            settings.batched_realtime = parse_flag(ENV_BATCHED_REALTIME, &value)?;
        }

        Ok(settings)
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool, SettingsError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(SettingsError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}
