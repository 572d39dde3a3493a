//! Error types for the supervisor and its settings.

use std::path::PathBuf;
use thiserror::Error;

use shepherd_queue::QueueError;

/// Supervisor errors.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Invalid supervisor configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Queue or store failure
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Settings could not be loaded
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// Signal handlers could not be installed
    #[error("Signal setup failed: {0}")]
    Signal(#[source] std::io::Error),

    /// The supervisor task panicked or was cancelled
    #[error("Supervisor task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Settings loading errors.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {var}: {value:?} ({reason})")]
    InvalidEnv {
        var: String,
        value: String,
        reason: String,
    },

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type for supervisor operations.
pub type SupervisorResult<T> = Result<T, SupervisorError>;
