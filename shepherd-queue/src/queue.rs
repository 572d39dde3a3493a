//! Message queue over a [`QueueStore`].

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::QueueResult;
use crate::handle::JobMessage;
use crate::message::{JobEnvelope, Message, MessageId, score_of};
use crate::redis_store::RedisStore;
use crate::store::QueueStore;

/// Queue configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Prefix for every store key
    pub key_prefix: String,

    /// Deliveries allowed before a message is dead-lettered
    pub max_retries: u32,

    /// First retry delay; doubles on each further attempt
    #[serde(with = "humantime_serde")]
    pub base_retry_delay: Duration,

    /// Optional ceiling on the retry delay
    #[serde(with = "humantime_serde")]
    pub max_retry_delay: Option<Duration>,

    /// Retention of the dead-letter list, refreshed on every dead-letter
    #[serde(with = "humantime_serde")]
    pub dead_letter_ttl: Duration,

    /// Entries scanned by a dead-letter requeue
    pub dead_letter_page_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            key_prefix: "shepherd:queue".to_string(),
            max_retries: 3,
            base_retry_delay: Duration::from_secs(60),
            max_retry_delay: None,
            dead_letter_ttl: Duration::from_secs(7 * 24 * 3600),
            dead_letter_page_size: 100,
        }
    }
}

impl QueueConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the maximum number of deliveries.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base retry delay.
    pub fn with_base_retry_delay(mut self, delay: Duration) -> Self {
        self.base_retry_delay = delay;
        self
    }

    /// Clamp retry delays to `max`.
    pub fn with_max_retry_delay(mut self, max: Duration) -> Self {
        self.max_retry_delay = Some(max);
        self
    }

    /// Set the dead-letter retention.
    pub fn with_dead_letter_ttl(mut self, ttl: Duration) -> Self {
        self.dead_letter_ttl = ttl;
        self
    }

    /// Set how many dead-letter entries a requeue scans.
    pub fn with_dead_letter_page_size(mut self, size: usize) -> Self {
        self.dead_letter_page_size = size;
        self
    }

    /// FIFO list for `queue`.
    pub fn pending_key(&self, queue: &str) -> String {
        format!("{}:{}:pending", self.key_prefix, queue)
    }

    /// Priority sorted set for `queue`.
    pub fn priority_key(&self, queue: &str) -> String {
        format!("{}:{}:priority", self.key_prefix, queue)
    }

    /// Delayed sorted set for `queue`, scored by due time.
    pub fn delayed_key(&self, queue: &str) -> String {
        format!("{}:{}:delayed", self.key_prefix, queue)
    }

    /// In-flight hash for `queue`.
    pub fn processing_key(&self, queue: &str) -> String {
        format!("{}:{}:processing", self.key_prefix, queue)
    }

    /// Dead-letter list shared by every queue.
    pub fn dead_letter_key(&self) -> String {
        format!("{}:dead_letter", self.key_prefix)
    }
}

/// Publish-time placement options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// 0 = FIFO
    pub priority: u32,
    pub delay: Duration,
}

impl PublishOptions {
    /// Deliver by priority, highest first.
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Hold delivery back.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Point-in-time queue counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub priority: usize,
    pub delayed: usize,
    pub processing: usize,
    /// Shared across all queues
    pub dead_letter: usize,
}

impl QueueStats {
    /// Messages ready for delivery right now.
    pub fn backlog(&self) -> usize {
        self.pending + self.priority
    }
}

/// Priority and delayed message queue.
///
/// Cheap to clone; clones share the store, configuration and clock.
#[derive(Clone)]
pub struct MessageQueue {
    store: Arc<dyn QueueStore>,
    config: Arc<QueueConfig>,
    clock: Arc<dyn Clock>,
}

impl MessageQueue {
    /// Create a queue over `store` with default configuration.
    pub fn new(store: impl QueueStore + 'static) -> Self {
        Self::with_config(store, QueueConfig::default())
    }

    /// Create a queue with custom configuration.
    pub fn with_config(store: impl QueueStore + 'static, config: QueueConfig) -> Self {
        Self::from_shared(Arc::new(store), config)
    }

    /// Create from an already shared store.
    pub fn from_shared(store: Arc<dyn QueueStore>, config: QueueConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
            clock: Arc::new(SystemClock),
        }
    }

    /// Connect to Redis and build a queue on it.
    pub async fn redis(
        redis: shepherd_redis::RedisConfig,
        config: QueueConfig,
    ) -> QueueResult<Self> {
        let store = RedisStore::connect(redis).await?;
        Ok(Self::with_config(store, config))
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Get the configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Get the underlying store.
    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    /// Publish a payload.
    pub async fn publish(
        &self,
        queue: &str,
        payload: serde_json::Value,
        options: PublishOptions,
    ) -> QueueResult<MessageId> {
        let now = self.clock.now();
        let message = Message::new(
            queue,
            payload,
            options.priority,
            self.config.max_retries,
            now,
            options.delay,
        );
        let raw = message.to_json()?;

        if !options.delay.is_zero() {
            self.store
                .sorted_set_add(
                    &self.config.delayed_key(queue),
                    &raw,
                    score_of(message.scheduled_for),
                )
                .await?;
        } else if options.priority > 0 {
            self.store
                .sorted_set_add(
                    &self.config.priority_key(queue),
                    &raw,
                    f64::from(options.priority),
                )
                .await?;
        } else {
            self.store
                .list_push(&self.config.pending_key(queue), &raw)
                .await?;
        }

        debug!(
            message_id = %message.id,
            queue,
            priority = options.priority,
            delay_ms = options.delay.as_millis() as u64,
            "Message published"
        );
        Ok(message.id)
    }

    /// Publish a typed job: `{"type": job_type, "data": data}`.
    pub async fn publish_job(
        &self,
        queue: &str,
        job_type: &str,
        data: serde_json::Value,
        options: PublishOptions,
    ) -> QueueResult<MessageId> {
        let payload = JobEnvelope::new(job_type, data).into_payload();
        self.publish(queue, payload, options).await
    }

    /// Take the next message from `queues`, waiting up to `timeout`.
    ///
    /// Due delayed messages are promoted first. Priority sets are drained
    /// before FIFO lists; earlier queues win ties. The message is recorded
    /// as processing before it is returned.
    pub async fn consume<S: AsRef<str>>(
        &self,
        queues: &[S],
        timeout: Duration,
    ) -> QueueResult<Option<JobMessage>> {
        let queues: Vec<&str> = queues.iter().map(AsRef::as_ref).collect();
        if queues.is_empty() {
            return Ok(None);
        }

        let now = self.clock.now();
        for queue in &queues {
            self.promote_due(queue, now).await?;
        }

        for queue in &queues {
            let key = self.config.priority_key(queue);
            while let Some(raw) = self.store.sorted_set_pop_max(&key).await? {
                if let Some(job) = self.start_processing(queue, raw).await? {
                    return Ok(Some(job));
                }
            }
        }

        let keys: Vec<String> = queues
            .iter()
            .map(|queue| self.config.pending_key(queue))
            .collect();
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let remaining = deadline.map_or(timeout, |at| {
                at.saturating_duration_since(Instant::now())
            });
            let Some((key, raw)) = self.store.list_pop_blocking(&keys, remaining).await? else {
                return Ok(None);
            };
            let queue = keys
                .iter()
                .position(|candidate| *candidate == key)
                .map_or("", |index| queues[index]);
            if let Some(job) = self.start_processing(queue, raw).await? {
                return Ok(Some(job));
            }
            if remaining.is_zero() {
                return Ok(None);
            }
        }
    }

    /// Settle a message as done. Acking twice is harmless.
    pub async fn ack(&self, id: MessageId, queue: &str) -> QueueResult<()> {
        let removed = self
            .store
            .hash_delete(&self.config.processing_key(queue), &id.to_string())
            .await?;
        if removed {
            debug!(message_id = %id, queue, "Message acknowledged");
        } else {
            debug!(message_id = %id, queue, "Ack for message not in processing");
        }
        Ok(())
    }

    /// Settle a message as failed.
    ///
    /// Retries with exponential backoff while `requeue` is set and attempts
    /// remain; otherwise the message is dead-lettered. Returns `false` if the
    /// message was not in processing.
    pub async fn reject(
        &self,
        id: MessageId,
        queue: &str,
        requeue: bool,
        reason: Option<&str>,
    ) -> QueueResult<bool> {
        let processing = self.config.processing_key(queue);
        let field = id.to_string();
        let Some(raw) = self.store.hash_get(&processing, &field).await? else {
            return Ok(false);
        };
        let mut message = Message::from_json(&raw)?;
        let now = self.clock.now();
        message.record_failure(reason, now);

        if !self.store.hash_delete(&processing, &field).await? {
            // Settled concurrently by someone else.
            return Ok(false);
        }

        if requeue && message.can_retry() {
            let delay =
                message.backoff_delay(self.config.base_retry_delay, self.config.max_retry_delay);
            message.reschedule(now, delay);
            self.store
                .sorted_set_add(
                    &self.config.delayed_key(queue),
                    &message.to_json()?,
                    score_of(message.scheduled_for),
                )
                .await?;
            info!(
                message_id = %id,
                queue,
                attempts = message.attempts,
                max_retries = message.max_retries,
                retry_in_secs = delay.as_secs(),
                "Message scheduled for retry"
            );
        } else {
            let dead_reason = if requeue {
                "Max retries exceeded"
            } else {
                reason.unwrap_or("Rejected without requeue")
            };
            message.mark_dead(dead_reason, now);
            self.push_dead_letter(&message.to_json()?).await?;
            warn!(
                message_id = %id,
                queue,
                attempts = message.attempts,
                reason = dead_reason,
                "Message moved to dead letter queue"
            );
        }

        Ok(true)
    }

    /// Counts for `queue`.
    pub async fn stats(&self, queue: &str) -> QueueResult<QueueStats> {
        Ok(QueueStats {
            pending: self.store.list_len(&self.config.pending_key(queue)).await?,
            priority: self
                .store
                .sorted_set_len(&self.config.priority_key(queue))
                .await?,
            delayed: self
                .store
                .sorted_set_len(&self.config.delayed_key(queue))
                .await?,
            processing: self
                .store
                .hash_len(&self.config.processing_key(queue))
                .await?,
            dead_letter: self
                .store
                .list_len(&self.config.dead_letter_key())
                .await?,
        })
    }

    /// Ready messages across `queues`.
    pub async fn backlog<S: AsRef<str>>(&self, queues: &[S]) -> QueueResult<usize> {
        let mut total = 0usize;
        for queue in queues {
            let queue = queue.as_ref();
            total = total
                .saturating_add(self.store.list_len(&self.config.pending_key(queue)).await?)
                .saturating_add(
                    self.store
                        .sorted_set_len(&self.config.priority_key(queue))
                        .await?,
                );
        }
        Ok(total)
    }

    /// Move due delayed messages of `queues` into their ready structures.
    ///
    /// `consume` does this on every call; the supervisor also calls it so
    /// retries become visible while no worker is polling.
    pub async fn promote_delayed<S: AsRef<str>>(&self, queues: &[S]) -> QueueResult<()> {
        let now = self.clock.now();
        for queue in queues {
            self.promote_due(queue.as_ref(), now).await?;
        }
        Ok(())
    }

    /// Drop everything held for `queue`. The dead-letter list is kept.
    pub async fn purge(&self, queue: &str) -> QueueResult<usize> {
        let keys = [
            self.config.pending_key(queue),
            self.config.priority_key(queue),
            self.config.delayed_key(queue),
            self.config.processing_key(queue),
        ];
        let removed = self.store.delete(&keys).await?;
        info!(queue, keys_removed = removed, "Queue purged");
        Ok(removed)
    }

    /// Move a dead-lettered message back to its queue with a fresh retry
    /// budget. Only the newest page of the dead-letter list is searched.
    pub async fn requeue_dead_letter(&self, id: MessageId) -> QueueResult<bool> {
        let key = self.config.dead_letter_key();
        let page = self.dead_letter_page(self.config.dead_letter_page_size).await?;

        for raw in page {
            let Ok(mut message) = Message::from_json(&raw) else {
                continue;
            };
            if message.id != id {
                continue;
            }
            if self.store.list_remove(&key, &raw).await? == 0 {
                return Ok(false);
            }
            message.reset_for_requeue(self.clock.now());
            self.store
                .list_push(&self.config.pending_key(&message.queue), &message.to_json()?)
                .await?;
            info!(message_id = %id, queue = %message.queue, "Dead letter requeued");
            return Ok(true);
        }

        Ok(false)
    }

    /// Up to `limit` dead-lettered messages, newest first.
    pub async fn dead_letter_messages(&self, limit: usize) -> QueueResult<Vec<Message>> {
        let page = self.dead_letter_page(limit).await?;
        Ok(page
            .iter()
            .rev()
            .filter_map(|raw| match Message::from_json(raw) {
                Ok(message) => Some(message),
                Err(err) => {
                    warn!(error = %err, "Skipping unreadable dead letter entry");
                    None
                }
            })
            .collect())
    }

    /// Messages currently in flight for `queue`.
    pub async fn processing_messages(&self, queue: &str) -> QueueResult<Vec<Message>> {
        let values = self
            .store
            .hash_values(&self.config.processing_key(queue))
            .await?;
        Ok(values
            .iter()
            .filter_map(|raw| Message::from_json(raw).ok())
            .collect())
    }

    /// Reject every in-flight message of `queue` dequeued more than
    /// `older_than` ago. Returns how many were recovered.
    pub async fn recover_stale(&self, queue: &str, older_than: Duration) -> QueueResult<usize> {
        let now = self.clock.now();
        let cutoff = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC);

        let mut recovered = 0;
        for message in self.processing_messages(queue).await? {
            let since = message.dequeued_at.unwrap_or(message.published_at);
            if since >= cutoff {
                continue;
            }
            if self
                .reject(message.id, queue, true, Some("processing timed out"))
                .await?
            {
                recovered += 1;
            }
        }

        if recovered > 0 {
            warn!(queue, recovered, "Recovered stale processing entries");
        }
        Ok(recovered)
    }

    async fn dead_letter_page(&self, size: usize) -> QueueResult<Vec<String>> {
        if size == 0 {
            return Ok(Vec::new());
        }
        let start = -(isize::try_from(size).unwrap_or(isize::MAX));
        self.store
            .list_range(&self.config.dead_letter_key(), start, -1)
            .await
    }

    async fn push_dead_letter(&self, raw: &str) -> QueueResult<()> {
        let key = self.config.dead_letter_key();
        self.store.list_push(&key, raw).await?;
        self.store.expire(&key, self.config.dead_letter_ttl).await?;
        Ok(())
    }

    async fn promote_due(&self, queue: &str, now: chrono::DateTime<chrono::Utc>) -> QueueResult<()> {
        let delayed = self.config.delayed_key(queue);
        let due = self
            .store
            .sorted_set_range_by_score(&delayed, f64::NEG_INFINITY, score_of(now))
            .await?;

        for raw in due {
            if !self.store.sorted_set_remove(&delayed, &raw).await? {
                continue;
            }
            match Message::from_json(&raw) {
                Ok(message) if message.priority > 0 => {
                    self.store
                        .sorted_set_add(
                            &self.config.priority_key(queue),
                            &raw,
                            f64::from(message.priority),
                        )
                        .await?;
                }
                Ok(_) => {
                    self.store
                        .list_push(&self.config.pending_key(queue), &raw)
                        .await?;
                }
                Err(err) => {
                    warn!(queue, error = %err, "Parking unreadable delayed entry");
                    self.push_dead_letter(&raw).await?;
                }
            }
        }
        Ok(())
    }

    async fn start_processing(&self, queue: &str, raw: String) -> QueueResult<Option<JobMessage>> {
        let mut message = match Message::from_json(&raw) {
            Ok(message) => message,
            Err(err) => {
                warn!(queue, error = %err, "Parking unreadable queue entry");
                self.push_dead_letter(&raw).await?;
                return Ok(None);
            }
        };
        if !queue.is_empty() {
            message.queue = queue.to_string();
        }
        message.dequeued_at = Some(self.clock.now());

        self.store
            .hash_set(
                &self.config.processing_key(&message.queue),
                &message.id.to_string(),
                &message.to_json()?,
            )
            .await?;

        debug!(message_id = %message.id, queue = %message.queue, attempts = message.attempts, "Message dequeued");
        Ok(Some(JobMessage::new(self.clone(), message)))
    }
}

impl std::fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageQueue")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::MemoryStore;
    use serde_json::json;

    fn queue() -> (MessageQueue, MemoryStore, ManualClock) {
        let store = MemoryStore::new();
        let clock = ManualClock::starting_now();
        let queue = MessageQueue::new(store.clone()).with_clock(clock.clone());
        (queue, store, clock)
    }

    #[test]
    fn test_config_keys() {
        let config = QueueConfig::default().with_key_prefix("app:q");
        assert_eq!(config.pending_key("emails"), "app:q:emails:pending");
        assert_eq!(config.priority_key("emails"), "app:q:emails:priority");
        assert_eq!(config.delayed_key("emails"), "app:q:emails:delayed");
        assert_eq!(config.processing_key("emails"), "app:q:emails:processing");
        assert_eq!(config.dead_letter_key(), "app:q:dead_letter");
    }

    #[test]
    fn test_config_deserialize_durations() {
        let config: QueueConfig = serde_json::from_value(json!({
            "max_retries": 5,
            "base_retry_delay": "30s",
            "max_retry_delay": "1h",
        }))
        .unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.base_retry_delay, Duration::from_secs(30));
        assert_eq!(config.max_retry_delay, Some(Duration::from_secs(3600)));
        assert_eq!(config.key_prefix, "shepherd:queue");
    }

    #[test]
    fn test_stats_backlog() {
        let stats = QueueStats {
            pending: 3,
            priority: 2,
            delayed: 7,
            processing: 1,
            dead_letter: 4,
        };
        assert_eq!(stats.backlog(), 5);
    }

    #[tokio::test]
    async fn test_publish_placement() {
        let (queue, _, _) = queue();
        queue
            .publish("q", json!(1), PublishOptions::default())
            .await
            .unwrap();
        queue
            .publish("q", json!(2), PublishOptions::default().with_priority(4))
            .await
            .unwrap();
        queue
            .publish(
                "q",
                json!(3),
                PublishOptions::default()
                    .with_priority(4)
                    .with_delay(Duration::from_secs(5)),
            )
            .await
            .unwrap();

        let stats = queue.stats("q").await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.priority, 1);
        assert_eq!(stats.delayed, 1);
        assert_eq!(stats.processing, 0);
    }

    #[tokio::test]
    async fn test_consume_records_processing() {
        let (queue, _, clock) = queue();
        let id = queue
            .publish("q", json!({"k": "v"}), PublishOptions::default())
            .await
            .unwrap();

        let job = queue.consume(&["q"], Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(job.id(), id);
        assert_eq!(job.queue(), "q");
        assert_eq!(job.message().dequeued_at, Some(clock.now()));

        let inflight = queue.processing_messages("q").await.unwrap();
        assert_eq!(inflight.len(), 1);
        assert_eq!(inflight[0].id, id);
    }

    #[tokio::test]
    async fn test_delayed_promotion_keeps_priority() {
        let (queue, _, clock) = queue();
        queue
            .publish(
                "q",
                json!("p"),
                PublishOptions::default()
                    .with_priority(3)
                    .with_delay(Duration::from_secs(1)),
            )
            .await
            .unwrap();

        clock.advance(Duration::from_secs(1));
        queue.promote_due("q", clock.now()).await.unwrap();
        let stats = queue.stats("q").await.unwrap();
        assert_eq!(stats.delayed, 0);
        assert_eq!(stats.priority, 1);
    }

    #[tokio::test]
    async fn test_reject_unknown_message() {
        let (queue, _, _) = queue();
        let rejected = queue
            .reject(uuid::Uuid::new_v4(), "q", true, None)
            .await
            .unwrap();
        assert!(!rejected);
    }

    #[tokio::test]
    async fn test_reject_without_requeue_dead_letters_with_reason() {
        let (queue, store, _) = queue();
        queue
            .publish("q", json!(null), PublishOptions::default())
            .await
            .unwrap();
        let job = queue.consume(&["q"], Duration::ZERO).await.unwrap().unwrap();
        assert!(job.reject(false, Some("bad payload")).await.unwrap());

        let dead = queue.dead_letter_messages(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].dead_letter_reason.as_deref(), Some("bad payload"));
        assert_eq!(dead[0].attempts, 1);
        assert!(store.ttl(&queue.config().dead_letter_key()).is_some());
    }

    #[tokio::test]
    async fn test_backoff_clamp() {
        let store = MemoryStore::new();
        let clock = ManualClock::starting_now();
        let config = QueueConfig::default()
            .with_max_retries(10)
            .with_base_retry_delay(Duration::from_secs(60))
            .with_max_retry_delay(Duration::from_secs(90));
        let queue = MessageQueue::with_config(store, config).with_clock(clock.clone());

        queue
            .publish("q", json!(null), PublishOptions::default())
            .await
            .unwrap();
        for _ in 0..2 {
            let job = queue.consume(&["q"], Duration::ZERO).await.unwrap().unwrap();
            job.reject(true, Some("again")).await.unwrap();
            clock.advance(Duration::from_secs(90));
        }

        let job = queue.consume(&["q"], Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(job.attempts(), 2);
    }

    #[tokio::test]
    async fn test_purge_keeps_dead_letter() {
        let (queue, _, _) = queue();
        queue
            .publish("q", json!(1), PublishOptions::default())
            .await
            .unwrap();
        let job = queue.consume(&["q"], Duration::ZERO).await.unwrap().unwrap();
        job.reject(false, None).await.unwrap();
        queue
            .publish("q", json!(2), PublishOptions::default().with_priority(2))
            .await
            .unwrap();

        queue.purge("q").await.unwrap();
        let stats = queue.stats("q").await.unwrap();
        assert_eq!(stats.backlog(), 0);
        assert_eq!(stats.dead_letter, 1);
    }

    #[tokio::test]
    async fn test_unreadable_entry_is_parked() {
        let (queue, store, _) = queue();
        store
            .list_push(&queue.config().pending_key("q"), "not json")
            .await
            .unwrap();

        assert!(queue.consume(&["q"], Duration::ZERO).await.unwrap().is_none());
        let stats = queue.stats("q").await.unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.dead_letter, 1);
        assert!(queue.dead_letter_messages(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recover_stale() {
        let (queue, _, clock) = queue();
        queue
            .publish("q", json!(null), PublishOptions::default())
            .await
            .unwrap();
        // Worker dies without settling.
        drop(queue.consume(&["q"], Duration::ZERO).await.unwrap());

        assert_eq!(
            queue.recover_stale("q", Duration::from_secs(300)).await.unwrap(),
            0
        );
        clock.advance(Duration::from_secs(301));
        assert_eq!(
            queue.recover_stale("q", Duration::from_secs(300)).await.unwrap(),
            1
        );

        let stats = queue.stats("q").await.unwrap();
        assert_eq!(stats.processing, 0);
        assert_eq!(stats.delayed, 1);
        assert!(queue.processing_messages("q").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_consume_empty_queue_list() {
        let (queue, _, _) = queue();
        let none: [&str; 0] = [];
        assert!(queue.consume(&none, Duration::ZERO).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_promote_delayed_without_consuming() {
        let (queue, _, clock) = queue();
        queue
            .publish(
                "jobs",
                json!({"type": "later"}),
                PublishOptions::default().with_delay(Duration::from_secs(30)),
            )
            .await
            .unwrap();

        queue.promote_delayed(&["jobs"]).await.unwrap();
        assert_eq!(queue.backlog(&["jobs"]).await.unwrap(), 0);

        clock.advance(Duration::from_secs(30));
        queue.promote_delayed(&["jobs"]).await.unwrap();
        let stats = queue.stats("jobs").await.unwrap();
        assert_eq!(stats.delayed, 0);
        assert_eq!(stats.pending, 1);
    }
}
