//! Error types for queue operations.

use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Queue-specific errors.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Redis error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Connection pool or startup failure
    #[error(transparent)]
    Backend(#[from] shepherd_redis::RedisError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Payload is not a `{"type": ..., "data": ...}` job envelope
    #[error("Invalid job envelope: {0}")]
    InvalidEnvelope(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Job log sink I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("Queue error: {0}")]
    Other(String),
}

impl QueueError {
    /// Whether retrying the same store call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Redis(err) => err.is_io_error() || err.is_timeout(),
            Self::Backend(err) => err.is_retryable(),
            Self::Io(_) => true,
            _ => false,
        }
    }
}

/// Failure raised by a job handler.
///
/// Carries a human-readable message that ends up as the message's
/// `last_error` and in the job log.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct JobError {
    message: String,
}

impl JobError {
    /// Create a new handler error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for JobError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for JobError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for JobError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("invalid job data: {}", err))
    }
}

/// Why dispatching a job to its handler did not produce a result.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No handler is registered for the job type
    #[error("No handler registered for job type: {0}")]
    UnknownJobType(String),

    /// The handler ran and failed
    #[error(transparent)]
    Failed(#[from] JobError),
}

impl DispatchError {
    /// Failures that no amount of retrying will fix.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::UnknownJobType(_))
    }
}
