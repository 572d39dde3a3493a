//! Layered settings for the supervisor binary.
//!
//! Defaults, then a TOML file, then environment variables. Command-line
//! overrides are applied by the binary on top.

use serde::{Deserialize, Serialize};
use shepherd_queue::QueueConfig;
use shepherd_redis::RedisConfig;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::config::SupervisorConfig;
use crate::error::SettingsError;

/// Settings file picked up from the working directory.
pub const DEFAULT_SETTINGS_FILE: &str = "shepherd.toml";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Filter directive, e.g. `info` or `shepherd_queue=debug`
    pub level: String,
    pub format: LogFormat,
    /// Append job results to this file as JSON lines
    pub job_log_file: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            job_log_file: None,
        }
    }
}

/// Everything the binary needs to start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub redis: RedisConfig,
    pub queue: QueueConfig,
    pub supervisor: SupervisorConfig,
    pub log: LogSettings,
}

impl Settings {
    /// Load from `path` (or `SHEPHERD_CONFIG`, or `shepherd.toml` if present),
    /// then layer `.env` and process environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let _ = dotenvy::dotenv();

        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("SHEPHERD_CONFIG").map(PathBuf::from))
            .or_else(|| {
                let default = PathBuf::from(DEFAULT_SETTINGS_FILE);
                default.exists().then_some(default)
            });

        let mut settings = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        settings.redis = settings.redis.from_env().build();
        settings.apply_env(|name| std::env::var(name).ok())?;
        Ok(settings)
    }

    /// Parse a TOML settings file.
    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let contents = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_toml(&contents).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded settings file");
        Ok(settings)
    }

    /// Parse TOML text.
    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Apply `SHEPHERD_*` variables read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(value) = var("SHEPHERD_MAX_WORKERS") {
            self.supervisor.max_workers = parse_number("SHEPHERD_MAX_WORKERS", &value)?;
        }
        if let Some(value) = var("SHEPHERD_QUEUES") {
            self.supervisor.queues = split_list(&value);
        }
        if let Some(value) = var("SHEPHERD_WORKER_TIMEOUT") {
            self.supervisor.worker_timeout = parse_duration("SHEPHERD_WORKER_TIMEOUT", &value)?;
        }
        if let Some(value) = var("SHEPHERD_TICK_INTERVAL") {
            self.supervisor.tick_interval = parse_duration("SHEPHERD_TICK_INTERVAL", &value)?;
        }
        if let Some(value) = var("SHEPHERD_SHUTDOWN_GRACE") {
            self.supervisor.shutdown_grace = parse_duration("SHEPHERD_SHUTDOWN_GRACE", &value)?;
        }
        if let Some(value) = var("SHEPHERD_STALE_PROCESSING_TIMEOUT") {
            self.supervisor.stale_processing_timeout = Some(parse_duration(
                "SHEPHERD_STALE_PROCESSING_TIMEOUT",
                &value,
            )?);
        }

        if let Some(value) = var("SHEPHERD_KEY_PREFIX") {
            self.queue.key_prefix = value;
        }
        if let Some(value) = var("SHEPHERD_MAX_RETRIES") {
            self.queue.max_retries = parse_number("SHEPHERD_MAX_RETRIES", &value)?;
        }
        if let Some(value) = var("SHEPHERD_BASE_RETRY_DELAY") {
            self.queue.base_retry_delay = parse_duration("SHEPHERD_BASE_RETRY_DELAY", &value)?;
        }
        if let Some(value) = var("SHEPHERD_MAX_RETRY_DELAY") {
            self.queue.max_retry_delay =
                Some(parse_duration("SHEPHERD_MAX_RETRY_DELAY", &value)?);
        }

        if let Some(value) = var("SHEPHERD_LOG_LEVEL") {
            self.log.level = value;
        }
        if let Some(value) = var("SHEPHERD_LOG_FORMAT") {
            self.log.format = value.parse::<LogFormat>().map_err(|reason| SettingsError::InvalidEnv {
                var: "SHEPHERD_LOG_FORMAT".to_string(),
                value: value.clone(),
                reason,
            })?;
        }
        if let Some(value) = var("SHEPHERD_JOB_LOG_FILE") {
            self.log.job_log_file = Some(PathBuf::from(value));
        }

        Ok(())
    }
}

/// Split a comma separated list, dropping blanks.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `30s`, `5m`, `1h 30m` or a bare number of seconds.
pub fn parse_duration_str(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(value).map_err(|e| e.to_string())
}

fn parse_duration(var: &str, value: &str) -> Result<Duration, SettingsError> {
    parse_duration_str(value).map_err(|reason| SettingsError::InvalidEnv {
        var: var.to_string(),
        value: value.to_string(),
        reason,
    })
}

fn parse_number<T>(var: &str, value: &str) -> Result<T, SettingsError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| SettingsError::InvalidEnv {
            var: var.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        })
}
