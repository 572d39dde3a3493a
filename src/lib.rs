// Shepherd - a Redis-backed job queue with a supervised worker pool
//
// This crate re-exports the queue, the Redis connection layer and the
// worker supervisor under one name.

// Re-export the queue
pub use shepherd_queue::*;

// Re-export the connection layer
pub use shepherd_redis as redis;

// Re-export the supervisor
#[cfg(feature = "supervisor")]
pub use shepherd_supervisor as supervisor;

#[cfg(feature = "supervisor")]
pub use shepherd_supervisor::{Supervisor, SupervisorConfig, SupervisorHandle, SupervisorReport};

/// Commonly used types
pub mod prelude {
    pub use shepherd_queue::prelude::*;

    #[cfg(feature = "supervisor")]
    pub use shepherd_supervisor::prelude::*;
}
