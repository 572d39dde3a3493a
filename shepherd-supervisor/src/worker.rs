//! Worker task body.

use futures::FutureExt;
use shepherd_queue::{HandlerRegistry, JobLog, JobMessage, MessageQueue};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SupervisorConfig;

/// Supervisor-assigned worker number.
pub type WorkerId = u64;

/// Why a worker left its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Stop was requested
    Stopped,
    /// Idle with no backlog while the pool was at least half full
    Idle,
}

/// Lifecycle notifications sent to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WorkerEvent {
    Heartbeat {
        worker: WorkerId,
        processed: u64,
    },
    Exited {
        worker: WorkerId,
        reason: ExitReason,
        processed: u64,
    },
}

/// Read-only view of the pool size shared with workers.
#[derive(Debug, Clone, Default)]
pub struct PoolGauge(Arc<AtomicUsize>);

impl PoolGauge {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn set(&self, size: usize) {
        self.0.store(size, Ordering::Release);
    }
}

pub(crate) struct WorkerContext {
    pub id: WorkerId,
    pub queue: MessageQueue,
    pub registry: Arc<HandlerRegistry>,
    pub job_log: Arc<dyn JobLog>,
    pub config: Arc<SupervisorConfig>,
    pub gauge: PoolGauge,
    pub events: mpsc::UnboundedSender<WorkerEvent>,
    pub stop: CancellationToken,
}

impl WorkerContext {
    /// Consume and dispatch until stopped or retired.
    pub async fn run(self) -> ExitReason {
        info!(worker_id = self.id, "Worker started");
        let mut processed = 0u64;

        let reason = loop {
            if self.stop.is_cancelled() {
                break ExitReason::Stopped;
            }

            match self
                .queue
                .consume(&self.config.queues, self.config.consume_timeout)
                .await
            {
                Ok(Some(job)) => {
                    self.process(job).await;
                    processed += 1;
                }
                Ok(None) => {
                    if self.should_retire().await {
                        break ExitReason::Idle;
                    }
                }
                Err(err) => {
                    error!(worker_id = self.id, error = %err, "Failed to consume from queue");
                    tokio::select! {
                        _ = self.stop.cancelled() => {}
                        _ = tokio::time::sleep(self.config.error_backoff) => {}
                    }
                }
            }

            let _ = self.events.send(WorkerEvent::Heartbeat {
                worker: self.id,
                processed,
            });
        };

        info!(worker_id = self.id, ?reason, processed, "Worker exiting");
        let _ = self.events.send(WorkerEvent::Exited {
            worker: self.id,
            reason,
            processed,
        });
        reason
    }

    async fn should_retire(&self) -> bool {
        if self.gauge.get() * 2 < self.config.max_workers {
            return false;
        }
        match self.queue.backlog(&self.config.queues).await {
            Ok(backlog) => backlog == 0,
            Err(err) => {
                warn!(worker_id = self.id, error = %err, "Backlog check failed");
                false
            }
        }
    }

    async fn process(&self, job: JobMessage) {
        let job_id = job.id();
        let started = Instant::now();

        let envelope = match job.envelope() {
            Ok(envelope) => envelope,
            Err(err) => {
                let reason = err.to_string();
                warn!(worker_id = self.id, %job_id, error = %reason, "Rejecting malformed job");
                self.settle_failure(job, false, &reason).await;
                return;
            }
        };

        debug!(worker_id = self.id, %job_id, job_type = %envelope.job_type, "Processing job");
        let outcome = AssertUnwindSafe(self.registry.execute(&envelope.job_type, envelope.data))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(result)) => {
                if let Err(err) = job.ack().await {
                    error!(worker_id = self.id, %job_id, error = %err, "Failed to ack job");
                }
                if let Err(err) = self
                    .job_log
                    .log_completion(job_id, self.id, started.elapsed(), result)
                    .await
                {
                    warn!(worker_id = self.id, %job_id, error = %err, "Failed to write job log");
                }
            }
            Ok(Err(err)) => {
                let requeue = !err.is_permanent();
                self.settle_failure(job, requeue, &err.to_string()).await;
            }
            Err(panic) => {
                let reason = format!("handler panicked: {}", panic_message(panic.as_ref()));
                error!(worker_id = self.id, %job_id, error = %reason, "Job handler panicked");
                self.settle_failure(job, true, &reason).await;
            }
        }
    }

    async fn settle_failure(&self, job: JobMessage, requeue: bool, reason: &str) {
        let job_id = job.id();
        if let Err(err) = job.reject(requeue, Some(reason)).await {
            error!(worker_id = self.id, %job_id, error = %err, "Failed to reject job");
        }
        if let Err(err) = self.job_log.log_failure(job_id, self.id, reason).await {
            warn!(worker_id = self.id, %job_id, error = %err, "Failed to write job log");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shepherd_queue::{JobError, MemoryJobLog, MemoryStore, PublishOptions, QueueConfig};
    use std::time::Duration;

    struct Harness {
        queue: MessageQueue,
        log: MemoryJobLog,
        gauge: PoolGauge,
        events: mpsc::UnboundedReceiver<WorkerEvent>,
        context: WorkerContext,
    }

    fn harness(max_workers: usize) -> Harness {
        let queue = MessageQueue::with_config(MemoryStore::new(), QueueConfig::default());
        let registry = HandlerRegistry::builder()
            .handler_fn("ok", |data| async move { Ok(data) })
            .handler_fn("fail", |_| async { Err(JobError::new("nope")) })
            .handler_fn("panic", |data| async move {
                if data.is_null() {
                    panic!("handler blew up");
                }
                Ok(data)
            })
            .build();
        let log = MemoryJobLog::new();
        let gauge = PoolGauge::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let config = SupervisorConfig::default()
            .with_max_workers(max_workers)
            .with_queues(["jobs"])
            .with_consume_timeout(Duration::from_millis(10));

        let context = WorkerContext {
            id: 1,
            queue: queue.clone(),
            registry: Arc::new(registry),
            job_log: Arc::new(log.clone()),
            config: Arc::new(config),
            gauge: gauge.clone(),
            events: tx,
            stop: CancellationToken::new(),
        };
        Harness {
            queue,
            log,
            gauge,
            events: rx,
            context,
        }
    }

    async fn next_job(queue: &MessageQueue) -> JobMessage {
        queue
            .consume(&["jobs"], Duration::ZERO)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_success_acks_and_logs() {
        let h = harness(2);
        h.queue
            .publish_job("jobs", "ok", json!({"n": 1}), PublishOptions::default())
            .await
            .unwrap();

        h.context.process(next_job(&h.queue).await).await;

        let stats = h.queue.stats("jobs").await.unwrap();
        assert_eq!(stats.processing, 0);
        assert_eq!(stats.delayed, 0);
        assert_eq!(h.log.completions(), 1);
        assert_eq!(h.log.entries()[0].worker_id, 1);
    }

    #[tokio::test]
    async fn test_handler_error_requeues() {
        let h = harness(2);
        h.queue
            .publish_job("jobs", "fail", json!(null), PublishOptions::default())
            .await
            .unwrap();

        h.context.process(next_job(&h.queue).await).await;

        let stats = h.queue.stats("jobs").await.unwrap();
        assert_eq!(stats.delayed, 1);
        assert_eq!(stats.dead_letter, 0);
        assert_eq!(h.log.failures(), 1);
    }

    #[tokio::test]
    async fn test_unknown_job_type_dead_letters() {
        let h = harness(2);
        h.queue
            .publish_job("jobs", "resize", json!(null), PublishOptions::default())
            .await
            .unwrap();

        h.context.process(next_job(&h.queue).await).await;

        let dead = h.queue.dead_letter_messages(1).await.unwrap();
        assert_eq!(
            dead[0].dead_letter_reason.as_deref(),
            Some("No handler registered for job type: resize")
        );
    }

    #[tokio::test]
    async fn test_malformed_payload_dead_letters() {
        let h = harness(2);
        h.queue
            .publish("jobs", json!("just a string"), PublishOptions::default())
            .await
            .unwrap();

        h.context.process(next_job(&h.queue).await).await;

        assert_eq!(h.queue.stats("jobs").await.unwrap().dead_letter, 1);
        assert_eq!(h.log.failures(), 1);
    }

    #[tokio::test]
    async fn test_panic_is_caught_and_requeued() {
        let h = harness(2);
        h.queue
            .publish_job("jobs", "panic", json!(null), PublishOptions::default())
            .await
            .unwrap();

        h.context.process(next_job(&h.queue).await).await;

        let stats = h.queue.stats("jobs").await.unwrap();
        assert_eq!(stats.delayed, 1);
        let entry = &h.log.entries()[0];
        assert!(!entry.is_completed());
    }

    #[tokio::test]
    async fn test_idle_worker_retires_when_pool_half_full() {
        let mut h = harness(2);
        h.gauge.set(1);

        let reason = h.context.run().await;
        assert_eq!(reason, ExitReason::Idle);

        let mut exited = None;
        while let Ok(event) = h.events.try_recv() {
            if let WorkerEvent::Exited { reason, .. } = event {
                exited = Some(reason);
            }
        }
        assert_eq!(exited, Some(ExitReason::Idle));
    }

    #[tokio::test]
    async fn test_lone_worker_stays_below_half() {
        let h = harness(4);
        h.gauge.set(1);
        assert!(!h.context.should_retire().await);

        h.gauge.set(2);
        assert!(h.context.should_retire().await);
    }

    #[tokio::test]
    async fn test_stop_before_first_iteration() {
        let h = harness(4);
        h.context.stop.cancel();
        assert_eq!(h.context.run().await, ExitReason::Stopped);
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(5u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
