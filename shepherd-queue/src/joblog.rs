//! Job execution log sinks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::QueueResult;
use crate::message::MessageId;

/// How a job run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed {
        duration_secs: f64,
        result: serde_json::Value,
    },
    Failed {
        error: String,
    },
}

/// One line of the job log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLogEntry {
    pub job_id: MessageId,
    pub worker_id: u64,
    #[serde(flatten)]
    pub outcome: JobOutcome,
    pub logged_at: DateTime<Utc>,
}

impl JobLogEntry {
    pub fn completed(
        job_id: MessageId,
        worker_id: u64,
        duration: Duration,
        result: serde_json::Value,
    ) -> Self {
        Self {
            job_id,
            worker_id,
            outcome: JobOutcome::Completed {
                duration_secs: duration.as_secs_f64(),
                result,
            },
            logged_at: Utc::now(),
        }
    }

    pub fn failed(job_id: MessageId, worker_id: u64, error: impl Into<String>) -> Self {
        Self {
            job_id,
            worker_id,
            outcome: JobOutcome::Failed {
                error: error.into(),
            },
            logged_at: Utc::now(),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, JobOutcome::Completed { .. })
    }
}

/// Write-only sink for job execution records.
#[async_trait]
pub trait JobLog: Send + Sync {
    /// Persist one entry.
    async fn write(&self, entry: &JobLogEntry) -> QueueResult<()>;

    /// Record a successful run.
    async fn log_completion(
        &self,
        job_id: MessageId,
        worker_id: u64,
        duration: Duration,
        result: serde_json::Value,
    ) -> QueueResult<()> {
        self.write(&JobLogEntry::completed(job_id, worker_id, duration, result))
            .await
    }

    /// Record a failed run.
    async fn log_failure(&self, job_id: MessageId, worker_id: u64, error: &str) -> QueueResult<()> {
        self.write(&JobLogEntry::failed(job_id, worker_id, error))
            .await
    }
}

/// Emits entries as structured tracing events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingJobLog;

#[async_trait]
impl JobLog for TracingJobLog {
    async fn write(&self, entry: &JobLogEntry) -> QueueResult<()> {
        match &entry.outcome {
            JobOutcome::Completed { duration_secs, .. } => info!(
                job_id = %entry.job_id,
                worker_id = entry.worker_id,
                duration_secs,
                "Job completed"
            ),
            JobOutcome::Failed { error } => warn!(
                job_id = %entry.job_id,
                worker_id = entry.worker_id,
                error = %error,
                "Job failed"
            ),
        }
        Ok(())
    }
}

/// Appends entries to a file, one JSON object per line.
pub struct FileJobLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileJobLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl JobLog for FileJobLog {
    async fn write(&self, entry: &JobLogEntry) -> QueueResult<()> {
        let mut line = serde_json::to_string(entry)
            .map_err(|e| crate::QueueError::Serialization(e.to_string()))?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Keeps entries in memory.
#[derive(Clone, Default)]
pub struct MemoryJobLog {
    entries: Arc<parking_lot::Mutex<Vec<JobLogEntry>>>,
}

impl MemoryJobLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> Vec<JobLogEntry> {
        self.entries.lock().clone()
    }

    pub fn completions(&self) -> usize {
        self.entries.lock().iter().filter(|e| e.is_completed()).count()
    }

    pub fn failures(&self) -> usize {
        self.entries.lock().iter().filter(|e| !e.is_completed()).count()
    }
}

#[async_trait]
impl JobLog for MemoryJobLog {
    async fn write(&self, entry: &JobLogEntry) -> QueueResult<()> {
        self.entries.lock().push(entry.clone());
        Ok(())
    }
}

/// Fans entries out to several sinks.
///
/// Every sink is attempted; the first error is returned.
#[derive(Default)]
pub struct MultiJobLog {
    sinks: Vec<Arc<dyn JobLog>>,
}

impl MultiJobLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink.
    pub fn with(mut self, sink: impl JobLog + 'static) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl JobLog for MultiJobLog {
    async fn write(&self, entry: &JobLogEntry) -> QueueResult<()> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(err) = sink.write(entry).await {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
