//! In-process store for tests and single-process embedding.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::QueueResult;
use crate::store::QueueStore;

/// In-memory [`QueueStore`].
///
/// Clones share the same data. Expiry is driven by the tokio clock, so
/// paused-time tests can observe TTLs.
#[derive(Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    data: Mutex<Data>,
    pushed: Notify,
}

#[derive(Default)]
struct Data {
    lists: HashMap<String, VecDeque<String>>,
    sorted_sets: HashMap<String, HashMap<String, f64>>,
    hashes: HashMap<String, HashMap<String, String>>,
    expires_at: HashMap<String, Instant>,
}

impl Data {
    fn evict_expired(&mut self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .expires_at
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            self.remove_key(&key);
        }
    }

    fn remove_key(&mut self, key: &str) -> bool {
        self.expires_at.remove(key);
        let list = self.lists.remove(key).is_some();
        let zset = self.sorted_sets.remove(key).is_some();
        let hash = self.hashes.remove(key).is_some();
        list || zset || hash
    }

    fn exists(&self, key: &str) -> bool {
        self.lists.contains_key(key)
            || self.sorted_sets.contains_key(key)
            || self.hashes.contains_key(key)
    }

    fn try_pop(&mut self, keys: &[String]) -> Option<(String, String)> {
        for key in keys {
            let Some(list) = self.lists.get_mut(key) else {
                continue;
            };
            if let Some(value) = list.pop_front() {
                if list.is_empty() {
                    self.lists.remove(key);
                    self.expires_at.remove(key);
                }
                return Some((key.clone(), value));
            }
        }
        None
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining time-to-live of a key, if one is set.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let mut data = self.shared.data.lock();
        data.evict_expired();
        data.expires_at
            .get(key)
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Whether a key currently exists.
    pub fn contains_key(&self, key: &str) -> bool {
        let mut data = self.shared.data.lock();
        data.evict_expired();
        data.exists(key)
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.shared.data.lock();
        f.debug_struct("MemoryStore")
            .field("lists", &data.lists.len())
            .field("sorted_sets", &data.sorted_sets.len())
            .field("hashes", &data.hashes.len())
            .finish()
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn list_push(&self, key: &str, value: &str) -> QueueResult<()> {
        {
            let mut data = self.shared.data.lock();
            data.evict_expired();
            data.lists
                .entry(key.to_string())
                .or_default()
                .push_back(value.to_string());
        }
        self.shared.pushed.notify_waiters();
        Ok(())
    }

    async fn list_pop_blocking(
        &self,
        keys: &[String],
        timeout: Duration,
    ) -> QueueResult<Option<(String, String)>> {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let pushed = self.shared.pushed.notified();
            tokio::pin!(pushed);
            pushed.as_mut().enable();

            {
                let mut data = self.shared.data.lock();
                data.evict_expired();
                if let Some(hit) = data.try_pop(keys) {
                    return Ok(Some(hit));
                }
            }

            if timeout.is_zero() {
                return Ok(None);
            }
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, pushed).await.is_err() {
                        return Ok(None);
                    }
                }
                None => pushed.await,
            }
        }
    }

    async fn list_len(&self, key: &str) -> QueueResult<usize> {
        let mut data = self.shared.data.lock();
        data.evict_expired();
        Ok(data.lists.get(key).map_or(0, VecDeque::len))
    }

    async fn list_remove(&self, key: &str, value: &str) -> QueueResult<usize> {
        let mut data = self.shared.data.lock();
        data.evict_expired();
        let Some(list) = data.lists.get_mut(key) else {
            return Ok(0);
        };
        let before = list.len();
        list.retain(|entry| entry != value);
        let removed = before - list.len();
        if list.is_empty() {
            data.remove_key(key);
        }
        Ok(removed)
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> QueueResult<Vec<String>> {
        let mut data = self.shared.data.lock();
        data.evict_expired();
        let Some(list) = data.lists.get(key) else {
            return Ok(Vec::new());
        };
        let len = list.len() as isize;
        let resolve = |index: isize| if index < 0 { len + index } else { index };
        let start = resolve(start).max(0);
        let stop = resolve(stop).min(len - 1);
        if start > stop {
            return Ok(Vec::new());
        }
        Ok(list
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .cloned()
            .collect())
    }

    async fn sorted_set_add(&self, key: &str, member: &str, score: f64) -> QueueResult<()> {
        let mut data = self.shared.data.lock();
        data.evict_expired();
        data.sorted_sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn sorted_set_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> QueueResult<Vec<String>> {
        let mut data = self.shared.data.lock();
        data.evict_expired();
        let Some(set) = data.sorted_sets.get(key) else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<(&String, f64)> = set
            .iter()
            .filter(|(_, score)| **score >= min && **score <= max)
            .map(|(member, score)| (member, *score))
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        Ok(hits.into_iter().map(|(member, _)| member.clone()).collect())
    }

    async fn sorted_set_remove(&self, key: &str, member: &str) -> QueueResult<bool> {
        let mut data = self.shared.data.lock();
        data.evict_expired();
        let Some(set) = data.sorted_sets.get_mut(key) else {
            return Ok(false);
        };
        let removed = set.remove(member).is_some();
        if set.is_empty() {
            data.remove_key(key);
        }
        Ok(removed)
    }

    async fn sorted_set_pop_max(&self, key: &str) -> QueueResult<Option<String>> {
        let mut data = self.shared.data.lock();
        data.evict_expired();
        let Some(set) = data.sorted_sets.get_mut(key) else {
            return Ok(None);
        };
        let top = set
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1).then_with(|| a.0.cmp(b.0)))
            .map(|(member, _)| member.clone());
        if let Some(member) = &top {
            set.remove(member);
        }
        if set.is_empty() {
            data.remove_key(key);
        }
        Ok(top)
    }

    async fn sorted_set_len(&self, key: &str) -> QueueResult<usize> {
        let mut data = self.shared.data.lock();
        data.evict_expired();
        Ok(data.sorted_sets.get(key).map_or(0, HashMap::len))
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> QueueResult<()> {
        let mut data = self.shared.data.lock();
        data.evict_expired();
        data.hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> QueueResult<Option<String>> {
        let mut data = self.shared.data.lock();
        data.evict_expired();
        Ok(data
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field))
            .cloned())
    }

    async fn hash_delete(&self, key: &str, field: &str) -> QueueResult<bool> {
        let mut data = self.shared.data.lock();
        data.evict_expired();
        let Some(hash) = data.hashes.get_mut(key) else {
            return Ok(false);
        };
        let removed = hash.remove(field).is_some();
        if hash.is_empty() {
            data.remove_key(key);
        }
        Ok(removed)
    }

    async fn hash_len(&self, key: &str) -> QueueResult<usize> {
        let mut data = self.shared.data.lock();
        data.evict_expired();
        Ok(data.hashes.get(key).map_or(0, HashMap::len))
    }

    async fn hash_values(&self, key: &str) -> QueueResult<Vec<String>> {
        let mut data = self.shared.data.lock();
        data.evict_expired();
        Ok(data
            .hashes
            .get(key)
            .map(|hash| hash.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> QueueResult<bool> {
        let mut data = self.shared.data.lock();
        data.evict_expired();
        if !data.exists(key) {
            return Ok(false);
        }
        match Instant::now().checked_add(ttl) {
            Some(at) => {
                data.expires_at.insert(key.to_string(), at);
            }
            None => {
                data.expires_at.remove(key);
            }
        }
        Ok(true)
    }

    async fn delete(&self, keys: &[String]) -> QueueResult<usize> {
        let mut data = self.shared.data.lock();
        data.evict_expired();
        Ok(keys.iter().filter(|key| data.remove_key(key)).count())
    }
}
