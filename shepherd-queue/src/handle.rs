//! Handle returned by [`MessageQueue::consume`].

use chrono::{DateTime, Utc};

use crate::error::QueueResult;
use crate::message::{JobEnvelope, Message, MessageId};
use crate::queue::MessageQueue;

/// A dequeued message bound to the queue it came from.
///
/// Settling consumes the handle, so a delivery is acked or rejected at most
/// once through it. Dropping it unsettled leaves the message in processing.
pub struct JobMessage {
    queue: MessageQueue,
    message: Message,
}

impl JobMessage {
    pub(crate) fn new(queue: MessageQueue, message: Message) -> Self {
        Self { queue, message }
    }

    pub fn id(&self) -> MessageId {
        self.message.id
    }

    /// The caller payload.
    pub fn payload(&self) -> &serde_json::Value {
        &self.message.payload
    }

    /// Name of the queue the message was taken from.
    pub fn queue(&self) -> &str {
        &self.message.queue
    }

    /// Failed deliveries so far.
    pub fn attempts(&self) -> u32 {
        self.message.attempts
    }

    pub fn published_at(&self) -> DateTime<Utc> {
        self.message.published_at
    }

    /// Full message including bookkeeping fields.
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Read the payload as a job envelope.
    pub fn envelope(&self) -> QueueResult<JobEnvelope> {
        JobEnvelope::from_payload(&self.message.payload)
    }

    /// Mark the message done.
    pub async fn ack(self) -> QueueResult<()> {
        self.queue.ack(self.message.id, &self.message.queue).await
    }

    /// Mark the message failed. See [`MessageQueue::reject`].
    pub async fn reject(self, requeue: bool, reason: Option<&str>) -> QueueResult<bool> {
        self.queue
            .reject(self.message.id, &self.message.queue, requeue, reason)
            .await
    }
}

impl std::fmt::Debug for JobMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobMessage")
            .field("id", &self.message.id)
            .field("queue", &self.message.queue)
            .field("attempts", &self.message.attempts)
            .finish()
    }
}
