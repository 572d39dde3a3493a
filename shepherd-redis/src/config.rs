//! Redis configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Redis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis URL (redis://host:port or rediss://host:port for TLS).
    pub url: String,
    /// Connection pool size.
    ///
    /// Every worker holds a connection for the length of its blocking pop,
    /// so this should exceed the supervisor's `max_workers`.
    pub pool_size: u32,
    /// Minimum idle connections.
    pub min_idle: Option<u32>,
    /// Time allowed to check a connection out of the pool.
    #[serde(with = "humantime_serde")]
    pub connection_timeout: Duration,
    /// Database number (0-15).
    pub database: Option<u8>,
    /// Username for Redis 6+ ACL.
    pub username: Option<String>,
    /// Password.
    pub password: Option<String>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 16,
            min_idle: Some(1),
            connection_timeout: Duration::from_secs(5),
            database: None,
            username: None,
            password: None,
        }
    }
}

impl RedisConfig {
    /// Create a new configuration.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Create a builder.
    pub fn builder() -> RedisConfigBuilder {
        RedisConfigBuilder::new()
    }

    /// Layer `REDIS_*` environment variables over this configuration.
    pub fn from_env(self) -> RedisConfigBuilder {
        let mut builder = RedisConfigBuilder { config: self };

        if let Ok(url) = std::env::var("REDIS_URL") {
            builder = builder.url(url);
        }

        if let Ok(pool_size) = std::env::var("REDIS_POOL_SIZE")
            && let Ok(size) = pool_size.parse()
        {
            builder = builder.pool_size(size);
        }

        if let Ok(db) = std::env::var("REDIS_DATABASE")
            && let Ok(db_num) = db.parse()
        {
            builder = builder.database(db_num);
        }

        if let Ok(username) = std::env::var("REDIS_USERNAME") {
            builder = builder.username(username);
        }

        if let Ok(password) = std::env::var("REDIS_PASSWORD") {
            builder = builder.password(password);
        }

        builder
    }

    /// Get the full Redis URL with auth and database.
    pub fn connection_url(&self) -> String {
        let mut url = self.url.clone();

        if let Some(password) = &self.password {
            let auth = match &self.username {
                Some(username) => format!("{}:{}@", username, password),
                None => format!(":{}@", password),
            };
            for scheme in ["redis://", "rediss://"] {
                if url.starts_with(scheme) && !url.contains('@') {
                    url = url.replacen(scheme, &format!("{}{}", scheme, auth), 1);
                }
            }
        }

        if let Some(db) = self.database {
            let authority = url.split_once("://").map(|(_, rest)| rest).unwrap_or(&url);
            if !authority.contains('/') {
                url = format!("{}/{}", url.trim_end_matches('/'), db);
            }
        }

        url
    }

    /// URL safe for logging (password masked).
    pub fn redacted_url(&self) -> String {
        match &self.password {
            Some(password) if !password.is_empty() => {
                self.connection_url().replace(password.as_str(), "****")
            }
            _ => self.connection_url(),
        }
    }
}

/// Builder for Redis configuration.
#[derive(Default)]
pub struct RedisConfigBuilder {
    config: RedisConfig,
}

impl RedisConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: RedisConfig::default(),
        }
    }

    /// Set the Redis URL.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = url.into();
        self
    }

    /// Set the pool size.
    pub fn pool_size(mut self, size: u32) -> Self {
        self.config.pool_size = size;
        self
    }

    /// Set the minimum idle connections.
    pub fn min_idle(mut self, min_idle: u32) -> Self {
        self.config.min_idle = Some(min_idle);
        self
    }

    /// Set the checkout timeout.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    /// Set the database number.
    pub fn database(mut self, db: u8) -> Self {
        self.config.database = Some(db);
        self
    }

    /// Set the username (Redis 6+ ACL).
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.config.username = Some(username.into());
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Some(password.into());
        self
    }

    /// Build the configuration.
    pub fn build(self) -> RedisConfig {
        self.config
    }
}
