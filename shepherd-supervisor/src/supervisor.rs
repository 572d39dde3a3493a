//! Worker pool supervision.
//!
//! The supervisor is a single task that owns every worker's bookkeeping. It
//! wakes on a fixed tick and on worker events, and on each tick:
//!
//! 1. reaps finished workers,
//! 2. promotes due delayed messages, then spawns one worker if the pool is
//!    below `max_workers` and work is ready,
//! 3. kills workers whose last heartbeat is older than `worker_timeout`,
//! 4. optionally recovers stale processing entries.
//!
//! Shutdown cancels every worker, waits up to `shutdown_grace` for the pool to
//! drain, then aborts whatever is left.

use shepherd_queue::{HandlerRegistry, JobLog, MessageQueue, TracingJobLog};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SupervisorConfig;
use crate::error::SupervisorResult;
use crate::worker::{ExitReason, PoolGauge, WorkerContext, WorkerEvent, WorkerId};

const DRAIN_POLL: Duration = Duration::from_millis(100);
const EXIT_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Worker lifecycle state as seen by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Active,
    /// Asked to stop during shutdown, or reported its own exit and is being
    /// joined
    Exiting,
}

/// Snapshot of one tracked worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub id: WorkerId,
    pub started_at: Instant,
    pub last_activity: Instant,
    pub status: WorkerStatus,
    pub jobs_processed: u64,
}

/// Totals collected over a supervisor run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorReport {
    pub spawned: u64,
    /// Workers that finished on their own or after a stop request
    pub reaped: u64,
    /// Workers force-terminated for missing heartbeats
    pub killed: u64,
    /// Workers that retired while idle
    pub voluntary_exits: u64,
    pub jobs_processed: u64,
    /// Workers aborted when the shutdown grace period ran out
    pub forced_at_shutdown: u64,
}

/// Supervises a pool of queue workers.
pub struct Supervisor {
    queue: MessageQueue,
    registry: Arc<HandlerRegistry>,
    job_log: Arc<dyn JobLog>,
    config: Arc<SupervisorConfig>,
}

impl Supervisor {
    /// Create a supervisor. Job results go to [`TracingJobLog`] unless
    /// another sink is set.
    pub fn new(
        queue: MessageQueue,
        registry: impl Into<Arc<HandlerRegistry>>,
        config: SupervisorConfig,
    ) -> SupervisorResult<Self> {
        config.validate()?;
        Ok(Self {
            queue,
            registry: registry.into(),
            job_log: Arc::new(TracingJobLog),
            config: Arc::new(config),
        })
    }

    /// Send job results to `job_log`.
    pub fn with_job_log(mut self, job_log: impl JobLog + 'static) -> Self {
        self.job_log = Arc::new(job_log);
        self
    }

    /// Send job results to an already shared sink.
    pub fn with_shared_job_log(mut self, job_log: Arc<dyn JobLog>) -> Self {
        self.job_log = job_log;
        self
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Run on a background task.
    pub fn start(self) -> SupervisorHandle {
        let shutdown = CancellationToken::new();
        let gauge = PoolGauge::default();
        let (snapshot_tx, snapshot_rx) = watch::channel(Vec::new());

        let task = {
            let shutdown = shutdown.clone();
            let gauge = gauge.clone();
            tokio::spawn(async move { self.supervise(shutdown, gauge, snapshot_tx).await })
        };

        SupervisorHandle {
            shutdown,
            gauge,
            snapshot: snapshot_rx,
            task,
        }
    }

    /// Run until `shutdown` is cancelled and the pool has drained.
    pub async fn run(self, shutdown: CancellationToken) -> SupervisorReport {
        let (snapshot_tx, _) = watch::channel(Vec::new());
        self.supervise(shutdown, PoolGauge::default(), snapshot_tx)
            .await
    }

    async fn supervise(
        self,
        shutdown: CancellationToken,
        gauge: PoolGauge,
        snapshot: watch::Sender<Vec<WorkerInfo>>,
    ) -> SupervisorReport {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut pool = Pool {
            supervisor: self,
            shutdown: shutdown.clone(),
            gauge,
            snapshot,
            events: events_tx,
            workers: HashMap::new(),
            next_id: 1,
            report: SupervisorReport::default(),
        };

        info!(
            max_workers = pool.supervisor.config.max_workers,
            queues = ?pool.supervisor.config.queues,
            worker_timeout_secs = pool.supervisor.config.worker_timeout.as_secs(),
            "Supervisor started"
        );

        let mut ticker = tokio::time::interval(pool.supervisor.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => pool.tick(&mut events_rx).await,
                Some(event) = events_rx.recv() => pool.handle_event(event).await,
            }
        }

        pool.drain(&mut events_rx).await;
        info!(report = ?pool.report, "Supervisor stopped");
        pool.report
    }
}

/// Handle to a supervisor started with [`Supervisor::start`].
pub struct SupervisorHandle {
    shutdown: CancellationToken,
    gauge: PoolGauge,
    snapshot: watch::Receiver<Vec<WorkerInfo>>,
    task: JoinHandle<SupervisorReport>,
}

impl SupervisorHandle {
    /// Workers currently tracked.
    pub fn pool_size(&self) -> usize {
        self.gauge.get()
    }

    /// Latest snapshot of tracked workers.
    pub fn workers(&self) -> Vec<WorkerInfo> {
        self.snapshot.borrow().clone()
    }

    /// Token that stops the supervisor when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Request a graceful shutdown.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait for the supervisor to finish.
    pub async fn join(self) -> SupervisorResult<SupervisorReport> {
        Ok(self.task.await?)
    }

    /// Shut down and wait.
    pub async fn stop(self) -> SupervisorResult<SupervisorReport> {
        self.shutdown();
        self.join().await
    }
}

struct TrackedWorker {
    started_at: Instant,
    last_activity: Instant,
    status: WorkerStatus,
    jobs_processed: u64,
    stop: CancellationToken,
    handle: JoinHandle<ExitReason>,
}

struct Pool {
    supervisor: Supervisor,
    shutdown: CancellationToken,
    gauge: PoolGauge,
    snapshot: watch::Sender<Vec<WorkerInfo>>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    workers: HashMap<WorkerId, TrackedWorker>,
    next_id: WorkerId,
    report: SupervisorReport,
}

impl Pool {
    fn config(&self) -> &SupervisorConfig {
        &self.supervisor.config
    }

    async fn tick(&mut self, events: &mut mpsc::UnboundedReceiver<WorkerEvent>) {
        // Exit events carry the final job count, so settle them before reaping.
        while let Ok(event) = events.try_recv() {
            self.handle_event(event).await;
        }
        self.reap().await;
        self.scale().await;
        self.sweep_hung();
        self.recover_stale().await;
        self.publish();
    }

    async fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Heartbeat { worker, processed } => {
                if let Some(tracked) = self.workers.get_mut(&worker) {
                    tracked.last_activity = Instant::now();
                    tracked.jobs_processed = processed;
                }
            }
            WorkerEvent::Exited {
                worker,
                reason,
                processed,
            } => {
                let Some(tracked) = self.workers.get_mut(&worker) else {
                    return;
                };
                tracked.status = WorkerStatus::Exiting;
                tracked.jobs_processed = processed;
                self.publish();

                let Some(mut tracked) = self.workers.remove(&worker) else {
                    return;
                };
                if tokio::time::timeout(EXIT_JOIN_TIMEOUT, &mut tracked.handle)
                    .await
                    .is_err()
                {
                    tracked.handle.abort();
                }
                self.report.reaped += 1;
                self.report.jobs_processed += tracked.jobs_processed;
                if reason == ExitReason::Idle {
                    self.report.voluntary_exits += 1;
                }
                info!(
                    worker_id = worker,
                    ?reason,
                    processed,
                    pool_size = self.workers.len(),
                    "Reaped worker"
                );
                self.publish();
            }
        }
    }

    /// Remove workers whose task has already finished.
    async fn reap(&mut self) {
        let finished: Vec<WorkerId> = self
            .workers
            .iter()
            .filter(|(_, tracked)| tracked.handle.is_finished())
            .map(|(id, _)| *id)
            .collect();

        for id in finished {
            let Some(tracked) = self.workers.remove(&id) else {
                continue;
            };
            match tracked.handle.await {
                Ok(reason) => {
                    if reason == ExitReason::Idle {
                        self.report.voluntary_exits += 1;
                    }
                    info!(worker_id = id, ?reason, "Reaped worker");
                }
                Err(err) if err.is_panic() => {
                    error!(worker_id = id, "Worker panicked");
                }
                Err(err) => {
                    warn!(worker_id = id, error = %err, "Worker task ended abnormally");
                }
            }
            self.report.reaped += 1;
            self.report.jobs_processed += tracked.jobs_processed;
        }
    }

    async fn scale(&mut self) {
        if self.shutdown.is_cancelled() || self.workers.len() >= self.config().max_workers {
            return;
        }
        let queue = &self.supervisor.queue;
        let queues = &self.supervisor.config.queues;
        let backlog = match queue.promote_delayed(queues).await {
            Ok(()) => queue.backlog(queues).await,
            Err(err) => Err(err),
        };
        match backlog {
            Ok(0) => {}
            Ok(backlog) => {
                debug!(backlog, pool_size = self.workers.len(), "Backlog waiting");
                self.spawn_worker();
            }
            Err(err) => {
                warn!(error = %err, "Backlog check failed, retrying next tick");
            }
        }
    }

    fn spawn_worker(&mut self) {
        let id = self.next_id;
        self.next_id += 1;

        let stop = self.shutdown.child_token();
        let context = WorkerContext {
            id,
            queue: self.supervisor.queue.clone(),
            registry: Arc::clone(&self.supervisor.registry),
            job_log: Arc::clone(&self.supervisor.job_log),
            config: Arc::clone(&self.supervisor.config),
            gauge: self.gauge.clone(),
            events: self.events.clone(),
            stop: stop.clone(),
        };

        let now = Instant::now();
        self.workers.insert(
            id,
            TrackedWorker {
                started_at: now,
                last_activity: now,
                status: WorkerStatus::Active,
                jobs_processed: 0,
                stop,
                handle: tokio::spawn(context.run()),
            },
        );
        self.report.spawned += 1;
        self.gauge.set(self.workers.len());
        info!(worker_id = id, pool_size = self.workers.len(), "Spawned worker");
    }

    fn sweep_hung(&mut self) {
        let timeout = self.config().worker_timeout;
        let now = Instant::now();
        let hung: Vec<WorkerId> = self
            .workers
            .iter()
            .filter(|(_, tracked)| now.duration_since(tracked.last_activity) > timeout)
            .map(|(id, _)| *id)
            .collect();

        for id in hung {
            if let Some(tracked) = self.workers.remove(&id) {
                tracked.stop.cancel();
                tracked.handle.abort();
                self.report.killed += 1;
                self.report.jobs_processed += tracked.jobs_processed;
                warn!(
                    worker_id = id,
                    silent_secs = now.duration_since(tracked.last_activity).as_secs(),
                    "Killed hung worker"
                );
            }
        }
    }

    async fn recover_stale(&mut self) {
        let Some(older_than) = self.config().stale_processing_timeout else {
            return;
        };
        for queue in &self.supervisor.config.queues {
            if let Err(err) = self.supervisor.queue.recover_stale(queue, older_than).await {
                warn!(queue = %queue, error = %err, "Stale processing sweep failed");
            }
        }
    }

    async fn drain(&mut self, events: &mut mpsc::UnboundedReceiver<WorkerEvent>) {
        info!(pool_size = self.workers.len(), "Shutting down workers");
        for tracked in self.workers.values_mut() {
            tracked.stop.cancel();
            tracked.status = WorkerStatus::Exiting;
        }
        self.publish();

        let deadline = Instant::now() + self.config().shutdown_grace;
        while !self.workers.is_empty() {
            while let Ok(event) = events.try_recv() {
                self.handle_event(event).await;
            }
            self.reap().await;
            self.publish();

            let now = Instant::now();
            if self.workers.is_empty() || now >= deadline {
                break;
            }
            tokio::time::sleep(DRAIN_POLL.min(deadline - now)).await;
        }

        for (id, tracked) in self.workers.drain() {
            tracked.handle.abort();
            self.report.forced_at_shutdown += 1;
            self.report.jobs_processed += tracked.jobs_processed;
            warn!(worker_id = id, "Worker did not stop within grace period, aborted");
        }
        self.publish();
    }

    fn publish(&self) {
        self.gauge.set(self.workers.len());
        let mut workers: Vec<WorkerInfo> = self
            .workers
            .iter()
            .map(|(id, tracked)| WorkerInfo {
                id: *id,
                started_at: tracked.started_at,
                last_activity: tracked.last_activity,
                status: tracked.status,
                jobs_processed: tracked.jobs_processed,
            })
            .collect();
        workers.sort_by_key(|info| info.id);
        self.snapshot.send_replace(workers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shepherd_queue::MemoryStore;

    fn supervisor(config: SupervisorConfig) -> SupervisorResult<Supervisor> {
        Supervisor::new(
            MessageQueue::new(MemoryStore::new()),
            HandlerRegistry::default(),
            config,
        )
    }

    fn pool(config: SupervisorConfig) -> (Pool, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (snapshot, _) = watch::channel(Vec::new());
        let pool = Pool {
            supervisor: supervisor(config).unwrap(),
            shutdown: CancellationToken::new(),
            gauge: PoolGauge::default(),
            snapshot,
            events,
            workers: HashMap::new(),
            next_id: 1,
            report: SupervisorReport::default(),
        };
        (pool, events_rx)
    }

    async fn finished_worker(reason: ExitReason) -> TrackedWorker {
        let handle = tokio::spawn(async move { reason });
        while !handle.is_finished() {
            tokio::task::yield_now().await;
        }
        let now = Instant::now();
        TrackedWorker {
            started_at: now,
            last_activity: now,
            status: WorkerStatus::Active,
            jobs_processed: 0,
            stop: CancellationToken::new(),
            handle,
        }
    }

    #[tokio::test]
    async fn test_tick_settles_queued_events_before_reaping() {
        let (mut pool, mut events_rx) = pool(SupervisorConfig::default().with_queues(["jobs"]));
        pool.workers.insert(1, finished_worker(ExitReason::Idle).await);

        for processed in 0..1_000 {
            pool.events
                .send(WorkerEvent::Heartbeat { worker: 1, processed })
                .unwrap();
        }
        pool.events
            .send(WorkerEvent::Exited {
                worker: 1,
                reason: ExitReason::Idle,
                processed: 7,
            })
            .unwrap();

        pool.tick(&mut events_rx).await;

        assert!(pool.workers.is_empty());
        assert!(events_rx.try_recv().is_err());
        assert_eq!(pool.report.reaped, 1);
        assert_eq!(pool.report.voluntary_exits, 1);
        assert_eq!(pool.report.jobs_processed, 7);
    }

    #[tokio::test]
    async fn test_exit_event_marks_worker_exiting_until_joined() {
        let (mut pool, _events_rx) = pool(SupervisorConfig::default().with_queues(["jobs"]));
        let now = Instant::now();
        pool.workers.insert(
            4,
            TrackedWorker {
                started_at: now,
                last_activity: now,
                status: WorkerStatus::Active,
                jobs_processed: 0,
                stop: CancellationToken::new(),
                handle: tokio::spawn(async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    ExitReason::Idle
                }),
            },
        );

        let mut snapshots = pool.snapshot.subscribe();
        let first_change = tokio::spawn(async move {
            snapshots.changed().await.unwrap();
            snapshots.borrow_and_update().clone()
        });

        pool.handle_event(WorkerEvent::Exited {
            worker: 4,
            reason: ExitReason::Idle,
            processed: 2,
        })
        .await;

        let seen = first_change.await.unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].id, 4);
        assert_eq!(seen[0].status, WorkerStatus::Exiting);
        assert!(pool.workers.is_empty());
        assert_eq!(pool.report.voluntary_exits, 1);
        assert_eq!(pool.report.jobs_processed, 2);
    }

    #[test]
    fn test_new_validates_config() {
        assert!(supervisor(SupervisorConfig::default().with_max_workers(0)).is_err());
        assert!(supervisor(SupervisorConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_idle_queue_spawns_nothing() {
        let config = SupervisorConfig::default()
            .with_queues(["jobs"])
            .with_tick_interval(Duration::from_millis(10));
        let handle = supervisor(config).unwrap().start();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.pool_size(), 0);
        assert!(handle.workers().is_empty());

        let report = handle.stop().await.unwrap();
        assert_eq!(report, SupervisorReport::default());
    }
}
