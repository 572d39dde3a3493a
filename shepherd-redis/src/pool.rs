//! Redis connection pool.

use bb8::{Pool, PooledConnection};
use bb8_redis::RedisConnectionManager;
use redis::aio::MultiplexedConnection;
use std::ops::{Deref, DerefMut};
use tracing::{debug, info};

use crate::{RedisConfig, RedisError, Result};

/// Type alias for the connection pool.
pub type RedisPool = Pool<RedisConnectionManager>;

/// A pooled Redis connection, exclusively checked out until dropped.
pub struct RedisConnection<'a> {
    conn: PooledConnection<'a, RedisConnectionManager>,
}

impl<'a> RedisConnection<'a> {
    pub(crate) fn new(conn: PooledConnection<'a, RedisConnectionManager>) -> Self {
        Self { conn }
    }
}

impl Deref for RedisConnection<'_> {
    type Target = MultiplexedConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for RedisConnection<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

/// Builds a pool and proves the server answers before returning it.
pub struct RedisPoolBuilder {
    config: RedisConfig,
}

impl RedisPoolBuilder {
    /// Create a new pool builder.
    pub fn new(config: RedisConfig) -> Self {
        Self { config }
    }

    /// Build the connection pool.
    ///
    /// Fails with [`RedisError::Unreachable`] when the startup `PING` does not
    /// succeed, so callers can abort instead of running degraded.
    pub async fn build(self) -> Result<RedisPool> {
        let manager = RedisConnectionManager::new(self.config.connection_url())
            .map_err(|e| RedisError::Config(e.to_string()))?;

        let pool = Pool::builder()
            .max_size(self.config.pool_size)
            .min_idle(self.config.min_idle)
            .connection_timeout(self.config.connection_timeout)
            .build(manager)
            .await
            .map_err(|e| self.unreachable(e))?;

        {
            let mut conn = pool.get().await.map_err(|e| self.unreachable(e))?;
            let pong: String = redis::cmd("PING")
                .query_async(&mut *conn)
                .await
                .map_err(|e| self.unreachable(e))?;
            debug!(reply = %pong, "Redis startup probe answered");
        }

        info!(
            pool_size = self.config.pool_size,
            url = %self.config.redacted_url(),
            "Redis connection pool ready"
        );

        Ok(pool)
    }

    fn unreachable(&self, err: impl std::fmt::Display) -> RedisError {
        RedisError::Unreachable {
            url: self.config.redacted_url(),
            reason: err.to_string(),
        }
    }
}
