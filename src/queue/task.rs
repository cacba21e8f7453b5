//! Task definitions for the work queue.
//!
//! A task is a JSON object with a `type`, an optional `maxAttempts`, and any
//! number of type-specific fields. Its identity in the pending and claimed
//! sets is its *key*: the canonical JSON of everything except the attempt
//! count. The attempt count is stored next to the lease, so a retried task
//! keeps the same key.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::QueueError;

/// Task type whose handler publishes `msg` on the realtime channel.
pub const SEND_REALTIME_MESSAGE: &str = "SendRealtimeMessage";

fn is_zero(value: &u32) -> bool {
    *value == 0
}

/// A unit of background work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "type")]
    task_type: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    attempts: u32,
    #[serde(
        rename = "maxAttempts",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    max_attempts: Option<u32>,
    #[serde(flatten)]
    fields: Map<String, Value>,
    /// Cached fingerprint, computed on first use.
    #[serde(skip)]
    key: OnceLock<String>,
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.task_type == other.task_type
            && self.attempts == other.attempts
            && self.max_attempts == other.max_attempts
            && self.fields == other.fields
    }
}

impl Task {
    /// Creates a task of the given type with no fields.
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            attempts: 0,
            max_attempts: None,
            fields: Map::new(),
            key: OnceLock::new(),
        }
    }

    /// A `SendRealtimeMessage` task carrying `msg`.
    pub fn send_realtime(msg: Value) -> Self {
        Self::new(SEND_REALTIME_MESSAGE).with_field("msg", msg)
    }

    /// Sets a type-specific field. `type` and `maxAttempts` are reserved and
    /// ignored here.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        if name != "type" && name != "maxAttempts" && name != "attempts" {
            self.fields.insert(name, value.into());
            self.key = OnceLock::new();
        }
        self
    }

    /// Merges every field of a JSON object into the task.
    pub fn with_fields(self, fields: Map<String, Value>) -> Self {
        fields
            .into_iter()
            .fold(self, |task, (name, value)| task.with_field(name, value))
    }

    /// Sets the number of attempts before the task is dropped.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self.key = OnceLock::new();
        self
    }

    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    /// Handler invocations that have failed so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn set_attempts(&mut self, attempts: u32) {
        self.attempts = attempts;
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// The task's own attempt limit, or `default` when it carries none.
    pub fn effective_max_attempts(&self, default: u32) -> u32 {
        self.max_attempts.unwrap_or(default)
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// The task's fingerprint and set member.
    ///
    /// Tasks with the same type, fields and attempt limit share a key.
    pub fn key(&self) -> &str {
        self.key.get_or_init(|| self.fingerprint())
    }

    /// Serializes the task for storage as a sorted-set member.
    pub fn to_member(&self) -> String {
        self.key().to_string()
    }

    /// Decodes a sorted-set member. The member string becomes the task key,
    /// so a lease can always be found again even if it was not written in
    /// canonical form.
    pub fn from_member(member: &str) -> Result<Self, QueueError> {
        let mut task: Task =
            serde_json::from_str(member).map_err(|e| QueueError::InvalidTask {
                member: member.to_string(),
                reason: e.to_string(),
            })?;
        task.fields.remove("key");
        task.key = OnceLock::from(member.to_string());
        Ok(task)
    }

    fn fingerprint(&self) -> String {
        let mut object = Map::new();
        for (name, value) in &self.fields {
            object.insert(name.clone(), canonical(value));
        }
        object.insert("type".to_string(), Value::String(self.task_type.clone()));
        if let Some(max_attempts) = self.max_attempts {
            object.insert("maxAttempts".to_string(), Value::from(max_attempts));
        }
        canonical(&Value::Object(object)).to_string()
    }
}

/// Rebuilds objects with their keys in sorted order, recursively.
fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonical(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}
