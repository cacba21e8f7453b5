//! Realtime announcements.
//!
//! With batching off, [`Announcer::send_realtime`] publishes straight to the
//! realtime channel. With batching on, messages are appended to a shared
//! batch hash and a flush is attempted in the background. A flush runs under
//! its own lock and only fires once the batch has waited `hold_time` since
//! the last flush or has reached `max_batch_size`. Flushed messages travel as
//! one `SendRealtimeMessage` task carrying a [`BatchMessage`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::AnnounceConfig;
use crate::error::QueueError;
use crate::metrics::MetricsCollector;
use crate::realtime::RealtimePublisher;
use crate::store::now_millis;

use super::engine::WorkQueue;
use super::registry::{HandlerResult, TaskHandler, TaskRegistry};
use super::task::{Task, SEND_REALTIME_MESSAGE};

/// `type` tag of a batched realtime message.
pub const BATCH_MESSAGE_TYPE: &str = "batch";

/// Task field holding the highest announce id in a flushed batch. Keeps
/// batches with equal contents from collapsing into one pending task.
pub const BATCH_ID_FIELD: &str = "batchId";

/// Several realtime messages delivered as one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchMessage {
    #[serde(rename = "type")]
    pub kind: String,
    /// Messages in send order.
    pub batch: Vec<Value>,
}

impl BatchMessage {
    pub fn new(batch: Vec<Value>) -> Self {
        Self {
            kind: BATCH_MESSAGE_TYPE.to_string(),
            batch,
        }
    }
}

/// Sends realtime messages, directly or batched through the queue.
#[derive(Clone)]
pub struct Announcer {
    queue: WorkQueue,
    publisher: Arc<dyn RealtimePublisher>,
    config: AnnounceConfig,
    batched: bool,
    metrics: MetricsCollector,
}

impl Announcer {
    /// Creates an announcer that batches when the queue's settings enable
    /// `batched_realtime`.
    pub fn new(queue: WorkQueue, publisher: Arc<dyn RealtimePublisher>) -> Self {
        let config = queue.config().announce.clone();
        let batched = queue.settings().batched_realtime;
        Self {
            queue,
            publisher,
            config,
            batched,
            metrics: MetricsCollector::new(),
        }
    }

    /// Overrides the batching flag.
    pub fn with_batching(mut self, batched: bool) -> Self {
        self.batched = batched;
        self
    }

    pub fn is_batched(&self) -> bool {
        self.batched
    }

    /// Sends `msg` to realtime subscribers.
    ///
    /// In batched mode this returns once the message is in the batch; the
    /// flush attempt runs on a background task.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::PublishFailed` for a failed direct publish, or a
    /// store error if the message cannot be added to the batch.
    pub async fn send_realtime(&self, msg: Value) -> Result<(), QueueError> {
        if !self.batched {
            self.publisher.publish(&self.config.channel, &msg).await?;
            self.metrics.record_realtime("direct");
            return Ok(());
        }

        self.append(&msg).await?;
        self.metrics.record_realtime("batched");

        let announcer = self.clone();
        tokio::spawn(async move {
            if let Err(e) = announcer.flush().await {
                warn!(error = %e, "Announce batch flush failed");
            }
        });
        Ok(())
    }

    /// Adds a message to the batch under a fresh id. Returns the id.
    pub(crate) async fn append(&self, msg: &Value) -> Result<i64, QueueError> {
        let keys = self.queue.keys();
        let store = self.queue.store();
        let id = store.incr_by(&keys.announce_id, 1).await?;
        store
            .hset(&keys.announce_batch, &id.to_string(), &serde_json::to_string(msg)?)
            .await?;
        Ok(id)
    }

    /// Flushes the batch if it is due. Returns whether a batch was sent.
    ///
    /// A flush that cannot take the announce lock does nothing; whoever
    /// holds it will see the new messages.
    pub async fn flush(&self) -> Result<bool, QueueError> {
        self.queue
            .lock()
            .with_lock(&self.queue.keys().announce_lock, false, || {
                self.flush_locked(false)
            })
            .await
    }

    /// Flushes whatever is in the batch, ignoring the hold time.
    pub async fn flush_now(&self) -> Result<bool, QueueError> {
        self.queue
            .lock()
            .with_lock(&self.queue.keys().announce_lock, false, || {
                self.flush_locked(true)
            })
            .await
    }

    async fn flush_locked(&self, force: bool) -> Result<bool, QueueError> {
        let keys = self.queue.keys();
        let store = self.queue.store();
        let now = now_millis();

        let size = store.hlen(&keys.announce_batch).await?;
        if size == 0 {
            return Ok(false);
        }

        if !force {
            let last_flush = store
                .get(&keys.announce_last_flush)
                .await?
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(0);
            let hold_ms = self.config.hold_time.as_millis() as i64;
            if now - last_flush < hold_ms && size < self.config.max_batch_size {
                return Ok(false);
            }
        }

        let entries = store.hgetall(&keys.announce_batch).await?;
        let fields: Vec<String> = entries.keys().cloned().collect();

        let mut ordered: Vec<(i64, Value)> = Vec::with_capacity(entries.len());
        for (id, payload) in entries {
            let Ok(id) = id.parse::<i64>() else {
                warn!(field = %id, "Dropping announce entry with invalid id");
                continue;
            };
            match serde_json::from_str::<Value>(&payload) {
                Ok(msg) => ordered.push((id, msg)),
                Err(e) => warn!(id = id, error = %e, "Dropping undecodable announce entry"),
            }
        }
        ordered.sort_by_key(|(id, _)| *id);
        let batch_id = ordered.last().map(|(id, _)| *id);
        let batch: Vec<Value> = ordered.into_iter().map(|(_, msg)| msg).collect();
        let count = batch.len();

        if let Some(batch_id) = batch_id {
            let message = serde_json::to_value(BatchMessage::new(batch))?;
            let task = Task::send_realtime(message).with_field(BATCH_ID_FIELD, batch_id);
            self.queue.enqueue(task).await?;
        }
        store.hdel(&keys.announce_batch, &fields).await?;
        store
            .set(&keys.announce_last_flush, &now.to_string(), None)
            .await?;

        self.metrics.record_batch_flush(count);
        debug!(count = count, "Flushed announce batch");
        Ok(count > 0)
    }
}

/// Publishes the `msg` field of `SendRealtimeMessage` tasks.
struct SendRealtimeHandler {
    publisher: Arc<dyn RealtimePublisher>,
    channel: String,
}

#[async_trait]
impl TaskHandler for SendRealtimeHandler {
    async fn handle(&self, task: &Task) -> HandlerResult {
        let msg = task
            .field("msg")
            .ok_or_else(|| anyhow::anyhow!("{} task without msg", SEND_REALTIME_MESSAGE))?;
        self.publisher.publish(&self.channel, msg).await?;
        Ok(())
    }
}

/// Registers the `SendRealtimeMessage` handler, publishing on `channel`.
pub fn register_realtime_handler(
    registry: &TaskRegistry,
    publisher: Arc<dyn RealtimePublisher>,
    channel: impl Into<String>,
) {
    registry.register(
        SEND_REALTIME_MESSAGE,
        Arc::new(SendRealtimeHandler {
            publisher,
            channel: channel.into(),
        }),
    );
}
