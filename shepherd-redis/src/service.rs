//! Shared Redis handle used by the queue store.

use std::sync::Arc;

use crate::{
    RedisConfig, RedisError, Result,
    pool::{RedisConnection, RedisPool, RedisPoolBuilder},
};

/// Redis service providing the connection pool.
///
/// Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct RedisService {
    config: Arc<RedisConfig>,
    pool: RedisPool,
}

impl RedisService {
    /// Connect, probe the server and create the pool.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let pool = RedisPoolBuilder::new(config.clone()).build().await?;
        Ok(Self {
            config: Arc::new(config),
            pool,
        })
    }

    /// Create from an existing pool.
    pub fn from_pool(config: RedisConfig, pool: RedisPool) -> Self {
        Self {
            config: Arc::new(config),
            pool,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &RedisPool {
        &self.pool
    }

    /// Get a connection from the pool.
    pub async fn get(&self) -> Result<RedisConnection<'_>> {
        let conn = self.pool.get().await?;
        Ok(RedisConnection::new(conn))
    }

    /// Check if the server still answers.
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.get().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e| RedisError::Connection(e.to_string()))?;
        Ok(())
    }

    /// Get pool statistics.
    pub fn pool_stats(&self) -> PoolStats {
        let state = self.pool.state();
        PoolStats {
            connections: state.connections,
            idle_connections: state.idle_connections,
            max_size: self.config.pool_size,
        }
    }
}

/// Connection pool statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Total connections.
    pub connections: u32,
    /// Idle connections.
    pub idle_connections: u32,
    /// Configured ceiling.
    pub max_size: u32,
}

impl PoolStats {
    /// Connections currently checked out.
    pub fn in_use(&self) -> u32 {
        self.connections.saturating_sub(self.idle_connections)
    }
}
