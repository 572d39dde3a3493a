//! Worker pool supervision for the Shepherd job queue.
//!
//! A [`Supervisor`] keeps up to `max_workers` worker tasks consuming from an
//! ordered list of queues. Workers dispatch each job to the handler
//! registered for its type, ack on success and reject on failure. The
//! supervisor grows the pool while there is a backlog, lets idle workers
//! retire, kills workers that stop heartbeating and drains the pool on
//! shutdown.
//!
//! ## Example
//!
//! ```
//! use shepherd_queue::{HandlerRegistry, MemoryStore, MessageQueue, PublishOptions};
//! use shepherd_supervisor::{Supervisor, SupervisorConfig};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = MessageQueue::new(MemoryStore::new());
//! let registry = HandlerRegistry::builder()
//!     .handler_fn("greet", |data| async move { Ok(json!(format!("hello {}", data["name"]))) })
//!     .build();
//!
//! queue.publish_job("default", "greet", json!({"name": "ops"}), PublishOptions::default()).await?;
//!
//! let config = SupervisorConfig::default()
//!     .with_max_workers(2)
//!     .with_queues(["default"])
//!     .with_tick_interval(Duration::from_millis(50))
//!     .with_consume_timeout(Duration::from_millis(50));
//! let handle = Supervisor::new(queue.clone(), registry, config)?.start();
//!
//! while queue.stats("default").await?.backlog() > 0 {
//!     tokio::time::sleep(Duration::from_millis(20)).await;
//! }
//! let report = handle.stop().await?;
//! assert!(report.spawned >= 1);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod settings;
pub mod signal;
pub mod supervisor;
pub mod worker;

pub use config::SupervisorConfig;
pub use error::{SettingsError, SupervisorError, SupervisorResult};
pub use settings::{LogFormat, LogSettings, Settings};
pub use supervisor::{Supervisor, SupervisorHandle, SupervisorReport, WorkerInfo, WorkerStatus};
pub use worker::{ExitReason, PoolGauge, WorkerId};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::SupervisorConfig;
    pub use crate::error::{SupervisorError, SupervisorResult};
    pub use crate::supervisor::{Supervisor, SupervisorHandle, SupervisorReport};
}
