//! Realtime channel publishing.
//!
//! The queue only needs one operation from the realtime layer: a
//! fire-and-forget broadcast of a JSON message to every client subscribed to
//! a named channel.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde_json::Value;

use crate::error::QueueError;

/// Broadcasts messages to realtime subscribers.
#[async_trait]
pub trait RealtimePublisher: Send + Sync {
    async fn publish(&self, channel: &str, message: &Value) -> Result<(), QueueError>;
}

/// Publishes through Redis `PUBLISH`.
#[derive(Clone)]
pub struct RedisPublisher {
    redis: ConnectionManager,
}

impl RedisPublisher {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl RealtimePublisher for RedisPublisher {
    async fn publish(&self, channel: &str, message: &Value) -> Result<(), QueueError> {
        let payload = serde_json::to_string(message)?;
        let mut conn = self.redis.clone();
        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(|e| QueueError::PublishFailed {
                channel: channel.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}

/// Keeps every published message in memory.
///
/// Used by tests and by dry runs of the CLI.
#[derive(Debug, Clone, Default)]
pub struct RecordingPublisher {
    published: Arc<Mutex<Vec<(String, Value)>>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `(channel, message)` pair published so far, oldest first.
    pub fn published(&self) -> Vec<(String, Value)> {
        self.published
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl RealtimePublisher for RecordingPublisher {
    async fn publish(&self, channel: &str, message: &Value) -> Result<(), QueueError> {
        tracing::debug!(channel = channel, "Recorded realtime message");
        self.published
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((channel.to_string(), message.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_recording_publisher_keeps_order() {
        let publisher = RecordingPublisher::new();
        publisher.publish("a", &json!({"n": 1})).await.unwrap();
        publisher.publish("b", &json!({"n": 2})).await.unwrap();

        let published = publisher.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0], ("a".to_string(), json!({"n": 1})));
        assert_eq!(published[1].0, "b");
    }
}
