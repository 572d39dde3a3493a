//! Supervisor configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::SupervisorError;

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Upper bound on concurrent workers
    pub max_workers: usize,

    /// Queues every worker consumes, in preference order
    pub queues: Vec<String>,

    /// A worker silent for longer than this is killed
    #[serde(with = "humantime_serde")]
    pub worker_timeout: Duration,

    /// Control loop period
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,

    /// Blocking pop timeout per worker iteration
    #[serde(with = "humantime_serde")]
    pub consume_timeout: Duration,

    /// Time workers get to finish after shutdown is requested
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,

    /// Pause after a store error inside a worker
    #[serde(with = "humantime_serde")]
    pub error_backoff: Duration,

    /// Reject processing entries older than this, if set
    #[serde(with = "humantime_serde")]
    pub stale_processing_timeout: Option<Duration>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            queues: vec!["high".to_string(), "normal".to_string(), "low".to_string()],
            worker_timeout: Duration::from_secs(300),
            tick_interval: Duration::from_secs(1),
            consume_timeout: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(30),
            error_backoff: Duration::from_secs(1),
            stale_processing_timeout: None,
        }
    }
}

impl SupervisorConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Replace the queue list.
    pub fn with_queues<I, S>(mut self, queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.queues = queues.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_worker_timeout(mut self, timeout: Duration) -> Self {
        self.worker_timeout = timeout;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_consume_timeout(mut self, timeout: Duration) -> Self {
        self.consume_timeout = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    /// Enable the stale processing sweep.
    pub fn with_stale_processing_timeout(mut self, timeout: Duration) -> Self {
        self.stale_processing_timeout = Some(timeout);
        self
    }

    /// Check invariants the control loop relies on.
    pub fn validate(&self) -> Result<(), SupervisorError> {
        if self.max_workers == 0 {
            return Err(SupervisorError::Config(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if self.queues.is_empty() || self.queues.iter().any(|q| q.trim().is_empty()) {
            return Err(SupervisorError::Config(
                "queues must name at least one non-empty queue".to_string(),
            ));
        }
        if self.tick_interval.is_zero() {
            return Err(SupervisorError::Config(
                "tick_interval must be positive".to_string(),
            ));
        }
        if self.consume_timeout.is_zero() {
            return Err(SupervisorError::Config(
                "consume_timeout must be positive".to_string(),
            ));
        }
        // A worker blocked in consume must still heartbeat in time.
        if self.consume_timeout >= self.worker_timeout {
            return Err(SupervisorError::Config(format!(
                "consume_timeout ({:?}) must be shorter than worker_timeout ({:?})",
                self.consume_timeout, self.worker_timeout
            )));
        }
        Ok(())
    }
}
