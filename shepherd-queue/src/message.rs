//! Message definition and retry bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{QueueError, QueueResult};

/// Message unique identifier.
pub type MessageId = Uuid;

/// A unit of work travelling through the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier
    pub id: MessageId,

    /// Queue the message was published to
    pub queue: String,

    /// Caller payload
    pub payload: serde_json::Value,

    /// 0 = FIFO, >0 = priority set ordered by this value
    pub priority: u32,

    /// When the message was published
    pub published_at: DateTime<Utc>,

    /// Earliest delivery time
    pub scheduled_for: DateTime<Utc>,

    /// Delivery attempts that ended in a reject
    pub attempts: u32,

    /// Attempts allowed before dead-lettering
    pub max_retries: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<DateTime<Utc>>,

    /// When the message last entered processing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dequeued_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter_timestamp: Option<DateTime<Utc>>,
}

impl Message {
    /// Create a message published at `now`, deliverable after `delay`.
    pub fn new(
        queue: impl Into<String>,
        payload: serde_json::Value,
        priority: u32,
        max_retries: u32,
        now: DateTime<Utc>,
        delay: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue: queue.into(),
            payload,
            priority,
            published_at: now,
            scheduled_for: add_duration(now, delay),
            attempts: 0,
            max_retries,
            last_error: None,
            last_attempt: None,
            dequeued_at: None,
            dead_letter_reason: None,
            dead_letter_timestamp: None,
        }
    }

    /// Whether delivery was deferred at publish time.
    pub fn is_delayed(&self) -> bool {
        self.scheduled_for > self.published_at
    }

    /// Whether the message may be delivered at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_for <= now
    }

    /// Check if another delivery is allowed.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_retries
    }

    /// Record a rejected delivery.
    pub fn record_failure(&mut self, reason: Option<&str>, now: DateTime<Utc>) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_error = reason.map(str::to_string);
        self.last_attempt = Some(now);
        self.dequeued_at = None;
    }

    /// Backoff before the next delivery: `base * 2^(attempts-1)`.
    ///
    /// Grows without bound unless `cap` is given; never overflows.
    pub fn backoff_delay(&self, base: Duration, cap: Option<Duration>) -> Duration {
        let exponent = self.attempts.saturating_sub(1);
        let delay = 1u32
            .checked_shl(exponent)
            .and_then(|factor| base.checked_mul(factor))
            .unwrap_or(Duration::MAX);
        match cap {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// Push delivery back by `delay` from `now`.
    pub fn reschedule(&mut self, now: DateTime<Utc>, delay: Duration) {
        self.scheduled_for = add_duration(now, delay);
    }

    /// Stamp dead-letter metadata.
    pub fn mark_dead(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.dead_letter_reason = Some(reason.into());
        self.dead_letter_timestamp = Some(now);
        self.dequeued_at = None;
    }

    /// Clear failure history for a manual requeue.
    pub fn reset_for_requeue(&mut self, now: DateTime<Utc>) {
        self.attempts = 0;
        self.last_error = None;
        self.last_attempt = None;
        self.dequeued_at = None;
        self.dead_letter_reason = None;
        self.dead_letter_timestamp = None;
        self.scheduled_for = now;
    }

    /// Serialize for storage.
    pub fn to_json(&self) -> QueueResult<String> {
        serde_json::to_string(self).map_err(|e| QueueError::Serialization(e.to_string()))
    }

    /// Deserialize from storage.
    pub fn from_json(raw: &str) -> QueueResult<Self> {
        serde_json::from_str(raw).map_err(|e| QueueError::Deserialization(e.to_string()))
    }
}

/// Payload shape understood by the worker: `{"type": "...", "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    /// Handler key
    #[serde(rename = "type")]
    pub job_type: String,

    /// Handler input
    #[serde(default)]
    pub data: serde_json::Value,
}

impl JobEnvelope {
    /// Create an envelope.
    pub fn new(job_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            job_type: job_type.into(),
            data,
        }
    }

    /// Build the payload value.
    pub fn into_payload(self) -> serde_json::Value {
        serde_json::json!({ "type": self.job_type, "data": self.data })
    }

    /// Read an envelope out of a message payload.
    pub fn from_payload(payload: &serde_json::Value) -> QueueResult<Self> {
        let envelope: Self = serde_json::from_value(payload.clone())
            .map_err(|e| QueueError::InvalidEnvelope(e.to_string()))?;
        if envelope.job_type.is_empty() {
            return Err(QueueError::InvalidEnvelope("empty job type".to_string()));
        }
        Ok(envelope)
    }
}

/// Sorted-set score for a timestamp (fractional seconds).
pub(crate) fn score_of(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}

fn add_duration(at: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    let delta = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
    at.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
