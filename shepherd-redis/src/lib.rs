//! # Shepherd Redis
//!
//! Redis connectivity for the Shepherd job queue.
//!
//! ## Features
//!
//! - **Connection Pooling**: bb8-managed multiplexed connections
//! - **Blocking-safe**: every checkout is exclusive, so a consumer parked in
//!   `BLPOP` never stalls other workers
//! - **Startup probe**: the pool is only handed out after a successful `PING`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use shepherd_redis::{RedisConfig, RedisService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RedisConfig::builder()
//!         .url("redis://localhost:6379")
//!         .pool_size(16)
//!         .build();
//!
//!     let redis = RedisService::new(config).await?;
//!     let mut conn = redis.get().await?;
//!
//!     let len: usize = redis::cmd("LLEN")
//!         .arg("shepherd:queue:emails:pending")
//!         .query_async(&mut *conn)
//!         .await?;
//!     println!("pending: {len}");
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod pool;
mod service;

pub use config::{RedisConfig, RedisConfigBuilder};
pub use error::{RedisError, Result};
pub use pool::{RedisConnection, RedisPool, RedisPoolBuilder};
pub use service::{PoolStats, RedisService};

// Re-export redis crate for convenience
pub use redis;

/// Prelude for common imports.
pub mod prelude {
    pub use crate::config::{RedisConfig, RedisConfigBuilder};
    pub use crate::error::{RedisError, Result};
    pub use crate::pool::{RedisConnection, RedisPool};
    pub use crate::service::RedisService;
}
