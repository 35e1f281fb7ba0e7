//! Bounded in-process cache.
//!
//! Holds a fixed number of entries and evicts the oldest write first; reads
//! never refresh an entry's position. Expiry is checked lazily when a key is
//! touched.

use std::{num::NonZeroUsize, sync::Mutex, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use metrics::counter;
use tokio::time::Instant;
use tracing::debug;

use super::backend::KvBackend;
use super::error::CacheError;
use super::lock::lock_store;

pub const METRIC_CACHE_EVICT_TOTAL: &str = "rendergate_cache_evict_total";

struct MemoryEntry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn new(value: Bytes, ttl: Duration, now: Instant) -> Self {
        Self {
            value,
            expires_at: (!ttl.is_zero()).then(|| now + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

pub struct MemoryStore {
    entries: Mutex<LruCache<String, MemoryEntry>>,
}

impl MemoryStore {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        let mut entries = lock_store(&self.entries, "memory.get");
        live_entry(&mut entries, key, Instant::now()).map(|entry| entry.value.clone())
    }

    pub fn set(&self, key: &str, value: Bytes, ttl: Duration) {
        let mut entries = lock_store(&self.entries, "memory.set");
        insert(&mut entries, key, MemoryEntry::new(value, ttl, Instant::now()));
    }

    pub fn add(&self, key: &str, value: Bytes, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut entries = lock_store(&self.entries, "memory.add");
        if live_entry(&mut entries, key, now).is_some() {
            return false;
        }
        insert(&mut entries, key, MemoryEntry::new(value, ttl, now));
        true
    }

    pub fn increment(&self, key: &str) -> Result<Option<i64>, CacheError> {
        let now = Instant::now();
        let mut entries = lock_store(&self.entries, "memory.increment");
        if live_entry(&mut entries, key, now).is_none() {
            return Ok(None);
        }
        let Some(entry) = entries.peek_mut(key) else {
            return Ok(None);
        };

        let current = std::str::from_utf8(&entry.value)
            .ok()
            .and_then(|text| text.trim().parse::<i64>().ok())
            .ok_or_else(|| CacheError::NotAnInteger {
                key: key.to_string(),
            })?;
        let next = current.saturating_add(1);
        entry.value = Bytes::from(next.to_string());
        Ok(Some(next))
    }

    pub fn remove(&self, key: &str) -> bool {
        lock_store(&self.entries, "memory.remove")
            .pop(key)
            .is_some()
    }

    /// Number of stored entries, including ones that have expired but not yet
    /// been touched.
    pub fn len(&self) -> usize {
        lock_store(&self.entries, "memory.len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn live_entry<'a>(
    entries: &'a mut LruCache<String, MemoryEntry>,
    key: &str,
    now: Instant,
) -> Option<&'a MemoryEntry> {
    if entries.peek(key).is_some_and(|entry| entry.is_expired(now)) {
        entries.pop(key);
        return None;
    }
    entries.peek(key)
}

fn insert(entries: &mut LruCache<String, MemoryEntry>, key: &str, entry: MemoryEntry) {
    match entries.push(key.to_string(), entry) {
        Some((evicted, _)) if evicted != key => {
            debug!(cache = "memory", evicted = %evicted, "evicted oldest entry");
            counter!(METRIC_CACHE_EVICT_TOTAL).increment(1);
        }
        _ => {}
    }
}

#[async_trait]
impl KvBackend for MemoryStore {
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>, CacheError> {
        let now = Instant::now();
        let mut entries = lock_store(&self.entries, "memory.get_many");
        Ok(keys
            .iter()
            .map(|key| live_entry(&mut entries, key, now).map(|entry| entry.value.clone()))
            .collect())
    }

    async fn set_many(
        &self,
        values: Vec<(String, Bytes)>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut entries = lock_store(&self.entries, "memory.set_many");
        for (key, value) in values {
            insert(&mut entries, &key, MemoryEntry::new(value, ttl, now));
        }
        Ok(())
    }

    async fn add(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool, CacheError> {
        Ok(MemoryStore::add(self, key, value, ttl))
    }

    async fn increment(&self, key: &str) -> Result<Option<i64>, CacheError> {
        MemoryStore::increment(self, key)
    }
}
