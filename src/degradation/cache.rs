//! Last-known-good response cache.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CachedResponse {
    data: Value,
    stored_at: Instant,
}

/// A thread-safe cache of successful responses keyed by request identity.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    inner: Arc<DashMap<String, CachedResponse>>,
    capacity: usize,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl ResponseCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Store the latest successful payload for `key`.
    pub fn store(&self, key: String, data: Value) {
        self.store_at(key, data, Instant::now());
    }

    pub(crate) fn store_at(&self, key: String, data: Value, now: Instant) {
        if self.inner.len() >= self.capacity && !self.inner.contains_key(&key) {
            self.evict_oldest();
        }
        self.inner.insert(key, CachedResponse { data, stored_at: now });
    }

    /// Payload and age if one is stored and not older than `max_age`.
    pub fn get_fresh(&self, key: &str, max_age: Duration) -> Option<(Value, Duration)> {
        self.get_fresh_at(key, max_age, Instant::now())
    }

    pub(crate) fn get_fresh_at(&self, key: &str, max_age: Duration, now: Instant) -> Option<(Value, Duration)> {
        let entry = self.inner.get(key)?;
        let age = now.saturating_duration_since(entry.stored_at);
        if age > max_age {
            return None;
        }
        Some((entry.data.clone(), age))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn evict_oldest(&self) {
        let oldest = self
            .inner
            .iter()
            .min_by_key(|entry| entry.value().stored_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.inner.remove(&key);
        }
    }
}
