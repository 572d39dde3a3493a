//! Job queue core for Shepherd.
//!
//! Provides a message queue over a shared key-value store with:
//! - 📦 Redis-backed persistence, plus an in-memory store for tests
//! - ⭐ Priority delivery (highest first) ahead of FIFO lists
//! - ⏰ Delayed delivery
//! - 🔄 Retries with exponential backoff
//! - 💀 Dead letter queue with inspection and requeue
//! - 🎯 Typed job dispatch through an immutable handler registry
//! - 📝 Pluggable job execution logs
//!
//! ## Publishing and Consuming
//!
//! ```
//! use shepherd_queue::{MemoryStore, MessageQueue, PublishOptions};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), shepherd_queue::QueueError> {
//! let queue = MessageQueue::new(MemoryStore::new());
//!
//! queue.publish("emails", json!({"to": "a@example.com"}), PublishOptions::default()).await?;
//! queue.publish("emails", json!({"to": "vip@example.com"}), PublishOptions::default().with_priority(9)).await?;
//!
//! // Priority messages are delivered first.
//! let job = queue.consume(&["emails"], Duration::from_secs(1)).await?.unwrap();
//! assert_eq!(job.payload()["to"], "vip@example.com");
//! job.ack().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Retries and Dead Letters
//!
//! ```
//! use shepherd_queue::{MemoryStore, MessageQueue, PublishOptions, QueueConfig};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), shepherd_queue::QueueError> {
//! let config = QueueConfig::default().with_max_retries(1);
//! let queue = MessageQueue::with_config(MemoryStore::new(), config);
//!
//! let id = queue.publish("reports", json!(null), PublishOptions::default()).await?;
//! let job = queue.consume(&["reports"], Duration::ZERO).await?.unwrap();
//! job.reject(true, Some("renderer crashed")).await?;
//!
//! let dead = queue.dead_letter_messages(10).await?;
//! assert_eq!(dead[0].id, id);
//! assert!(queue.requeue_dead_letter(id).await?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Redis
//!
//! ```no_run
//! use shepherd_queue::{MessageQueue, QueueConfig};
//! use shepherd_redis::RedisConfig;
//!
//! # async fn example() -> Result<(), shepherd_queue::QueueError> {
//! let redis = RedisConfig::builder().url("redis://localhost:6379").build();
//! let queue = MessageQueue::redis(redis, QueueConfig::default()).await?;
//! println!("{:?}", queue.stats("emails").await?);
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod error;
pub mod handle;
pub mod joblog;
pub mod memory;
pub mod message;
pub mod queue;
pub mod redis_store;
pub mod registry;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DispatchError, JobError, QueueError, QueueResult};
pub use handle::JobMessage;
pub use joblog::{
    FileJobLog, JobLog, JobLogEntry, JobOutcome, MemoryJobLog, MultiJobLog, TracingJobLog,
};
pub use memory::MemoryStore;
pub use message::{JobEnvelope, Message, MessageId};
pub use queue::{MessageQueue, PublishOptions, QueueConfig, QueueStats};
pub use redis_store::RedisStore;
pub use registry::{HandlerRegistry, HandlerRegistryBuilder, JobHandler};
pub use store::QueueStore;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{JobError, QueueError, QueueResult};
    pub use crate::handle::JobMessage;
    pub use crate::joblog::JobLog;
    pub use crate::message::{JobEnvelope, Message, MessageId};
    pub use crate::queue::{MessageQueue, PublishOptions, QueueConfig, QueueStats};
    pub use crate::registry::{HandlerRegistry, JobHandler};
    pub use crate::store::QueueStore;
}
