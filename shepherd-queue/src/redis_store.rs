//! Redis-backed store adapter.

use async_trait::async_trait;
use shepherd_redis::{RedisConfig, RedisService};
use std::time::Duration;
use tracing::debug;

use crate::error::QueueResult;
use crate::store::QueueStore;

/// [`QueueStore`] over a pooled Redis connection.
#[derive(Clone)]
pub struct RedisStore {
    redis: RedisService,
}

impl RedisStore {
    /// Wrap an existing service.
    pub fn new(redis: RedisService) -> Self {
        Self { redis }
    }

    /// Connect to Redis, failing if the server does not answer.
    pub async fn connect(config: RedisConfig) -> QueueResult<Self> {
        let redis = RedisService::new(config).await?;
        Ok(Self::new(redis))
    }

    /// The underlying service.
    pub fn service(&self) -> &RedisService {
        &self.redis
    }
}

fn score_arg(score: f64) -> String {
    if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else if score == f64::INFINITY {
        "+inf".to_string()
    } else {
        score.to_string()
    }
}

#[async_trait]
impl QueueStore for RedisStore {
    async fn list_push(&self, key: &str, value: &str) -> QueueResult<()> {
        let mut conn = self.redis.get().await?;
        redis::cmd("RPUSH")
            .arg(key)
            .arg(value)
            .query_async::<()>(&mut *conn)
            .await?;
        Ok(())
    }

    async fn list_pop_blocking(
        &self,
        keys: &[String],
        timeout: Duration,
    ) -> QueueResult<Option<(String, String)>> {
        let mut conn = self.redis.get().await?;

        if timeout.is_zero() {
            for key in keys {
                let value: Option<String> = redis::cmd("LPOP")
                    .arg(key)
                    .query_async(&mut *conn)
                    .await?;
                if let Some(value) = value {
                    return Ok(Some((key.clone(), value)));
                }
            }
            return Ok(None);
        }

        let hit: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(keys)
            .arg(timeout.as_secs_f64())
            .query_async(&mut *conn)
            .await?;
        if hit.is_none() {
            debug!(queues = keys.len(), "Blocking pop timed out");
        }
        Ok(hit)
    }

    async fn list_len(&self, key: &str) -> QueueResult<usize> {
        let mut conn = self.redis.get().await?;
        Ok(redis::cmd("LLEN").arg(key).query_async(&mut *conn).await?)
    }

    async fn list_remove(&self, key: &str, value: &str) -> QueueResult<usize> {
        let mut conn = self.redis.get().await?;
        Ok(redis::cmd("LREM")
            .arg(key)
            .arg(0)
            .arg(value)
            .query_async(&mut *conn)
            .await?)
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> QueueResult<Vec<String>> {
        let mut conn = self.redis.get().await?;
        Ok(redis::cmd("LRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut *conn)
            .await?)
    }

    async fn sorted_set_add(&self, key: &str, member: &str, score: f64) -> QueueResult<()> {
        let mut conn = self.redis.get().await?;
        redis::cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .query_async::<()>(&mut *conn)
            .await?;
        Ok(())
    }

    async fn sorted_set_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> QueueResult<Vec<String>> {
        let mut conn = self.redis.get().await?;
        Ok(redis::cmd("ZRANGEBYSCORE")
            .arg(key)
            .arg(score_arg(min))
            .arg(score_arg(max))
            .query_async(&mut *conn)
            .await?)
    }

    async fn sorted_set_remove(&self, key: &str, member: &str) -> QueueResult<bool> {
        let mut conn = self.redis.get().await?;
        let removed: usize = redis::cmd("ZREM")
            .arg(key)
            .arg(member)
            .query_async(&mut *conn)
            .await?;
        Ok(removed > 0)
    }

    async fn sorted_set_pop_max(&self, key: &str) -> QueueResult<Option<String>> {
        let mut conn = self.redis.get().await?;
        // Reply is a flat [member, score] pair, empty when the set is empty.
        let reply: Vec<String> = redis::cmd("ZPOPMAX")
            .arg(key)
            .query_async(&mut *conn)
            .await?;
        Ok(reply.into_iter().next())
    }

    async fn sorted_set_len(&self, key: &str) -> QueueResult<usize> {
        let mut conn = self.redis.get().await?;
        Ok(redis::cmd("ZCARD").arg(key).query_async(&mut *conn).await?)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> QueueResult<()> {
        let mut conn = self.redis.get().await?;
        redis::cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(value)
            .query_async::<()>(&mut *conn)
            .await?;
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> QueueResult<Option<String>> {
        let mut conn = self.redis.get().await?;
        Ok(redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut *conn)
            .await?)
    }

    async fn hash_delete(&self, key: &str, field: &str) -> QueueResult<bool> {
        let mut conn = self.redis.get().await?;
        let removed: usize = redis::cmd("HDEL")
            .arg(key)
            .arg(field)
            .query_async(&mut *conn)
            .await?;
        Ok(removed > 0)
    }

    async fn hash_len(&self, key: &str) -> QueueResult<usize> {
        let mut conn = self.redis.get().await?;
        Ok(redis::cmd("HLEN").arg(key).query_async(&mut *conn).await?)
    }

    async fn hash_values(&self, key: &str) -> QueueResult<Vec<String>> {
        let mut conn = self.redis.get().await?;
        Ok(redis::cmd("HVALS").arg(key).query_async(&mut *conn).await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> QueueResult<bool> {
        let mut conn = self.redis.get().await?;
        let set: usize = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .query_async(&mut *conn)
            .await?;
        Ok(set > 0)
    }

    async fn delete(&self, keys: &[String]) -> QueueResult<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.redis.get().await?;
        Ok(redis::cmd("DEL").arg(keys).query_async(&mut *conn).await?)
    }
}
