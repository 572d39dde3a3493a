//! Store adapter: the primitive operations the queue is built from.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::QueueResult;

/// Minimal list / sorted-set / hash store the queue runs on.
///
/// Implementations carry no queue logic; every method maps onto a single
/// store command. Missing keys behave as empty structures.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Append to the tail of a list.
    async fn list_push(&self, key: &str, value: &str) -> QueueResult<()>;

    /// Pop the head of the first non-empty list among `keys`, waiting up to
    /// `timeout`. A zero timeout checks once without waiting.
    async fn list_pop_blocking(
        &self,
        keys: &[String],
        timeout: Duration,
    ) -> QueueResult<Option<(String, String)>>;

    async fn list_len(&self, key: &str) -> QueueResult<usize>;

    /// Remove every occurrence of `value`, returning how many were removed.
    async fn list_remove(&self, key: &str, value: &str) -> QueueResult<usize>;

    /// Inclusive range with negative indices counting from the tail.
    async fn list_range(&self, key: &str, start: isize, stop: isize) -> QueueResult<Vec<String>>;

    async fn sorted_set_add(&self, key: &str, member: &str, score: f64) -> QueueResult<()>;

    /// Members with `min <= score <= max`, lowest score first.
    async fn sorted_set_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> QueueResult<Vec<String>>;

    /// Returns `true` only for the caller that actually removed the member.
    async fn sorted_set_remove(&self, key: &str, member: &str) -> QueueResult<bool>;

    /// Pop the highest-scoring member.
    async fn sorted_set_pop_max(&self, key: &str) -> QueueResult<Option<String>>;

    async fn sorted_set_len(&self, key: &str) -> QueueResult<usize>;

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> QueueResult<()>;

    async fn hash_get(&self, key: &str, field: &str) -> QueueResult<Option<String>>;

    /// Returns `true` only for the caller that actually removed the field.
    async fn hash_delete(&self, key: &str, field: &str) -> QueueResult<bool>;

    async fn hash_len(&self, key: &str) -> QueueResult<usize>;

    async fn hash_values(&self, key: &str) -> QueueResult<Vec<String>>;

    /// Set a time-to-live on a whole key. `false` if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> QueueResult<bool>;

    /// Delete keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> QueueResult<usize>;
}
