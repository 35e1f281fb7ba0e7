//! One async contract over every cache backend.
//!
//! Reads never fail: backend errors are logged and reported as a miss.
//! Writes return their error so callers can log it with their own context,
//! but nothing here is ever fatal to a request.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use tracing::warn;

use super::backend::KvBackend;
use super::chunked::ChunkedStore;
use super::config::{BackendChoice, CacheConfig};
use super::entry::CachedEntry;
use super::error::CacheError;
use super::keys::CacheKey;
use super::memory::MemoryStore;
use super::redis_backend::RedisBackend;
use crate::infra::pool::WorkerPool;

pub enum KeyValueCache {
    Disabled,
    Memory(MemoryStore),
    External(ChunkedStore),
}

impl KeyValueCache {
    /// Build the backend chosen in configuration. Redis is not contacted
    /// until the first cache call.
    pub fn from_config(config: &CacheConfig) -> Result<Self, CacheError> {
        Ok(match &config.backend {
            BackendChoice::Disabled => Self::Disabled,
            BackendChoice::Memory { limit } => Self::Memory(MemoryStore::new(*limit)),
            BackendChoice::Redis { url } => {
                let backend: Arc<dyn KvBackend> = Arc::new(RedisBackend::new(url)?);
                Self::external(backend, config)
            }
        })
    }

    /// Chunked store over an arbitrary backend.
    pub fn external(backend: Arc<dyn KvBackend>, config: &CacheConfig) -> Self {
        let pool = WorkerPool::new("cache-io", config.io_workers);
        Self::External(ChunkedStore::new(
            backend,
            pool,
            config.chunk_size.get(),
            config.max_chunks.get(),
        ))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Memory(_) => "memory",
            Self::External(_) => "external",
        }
    }

    pub async fn get(&self, key: &str) -> Option<Bytes> {
        match self {
            Self::Disabled => None,
            Self::Memory(store) => store.get(key),
            Self::External(store) => match store.get(key).await {
                Ok(value) => value,
                Err(err) => {
                    warn!(cache = self.kind(), op = "get", error = %err, "cache read failed; treating as miss");
                    None
                }
            },
        }
    }

    pub async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError> {
        match self {
            Self::Disabled => Ok(()),
            Self::Memory(store) => {
                store.set(key, value, ttl);
                Ok(())
            }
            Self::External(store) => store.put(key, value, ttl).await,
        }
    }

    /// Store only if absent. The disabled cache reports every add as
    /// accepted.
    pub async fn add(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool, CacheError> {
        match self {
            Self::Disabled => Ok(true),
            Self::Memory(store) => Ok(store.add(key, value, ttl)),
            Self::External(store) => store.add(key, value, ttl).await,
        }
    }

    pub async fn increment(&self, key: &str) -> Result<Option<i64>, CacheError> {
        match self {
            Self::Disabled => Ok(None),
            Self::Memory(store) => store.increment(key),
            Self::External(store) => store.increment(key).await,
        }
    }

    pub async fn get_entry(&self, key: &CacheKey) -> Option<CachedEntry> {
        let bytes = self.get(key.as_str()).await?;
        let entry = CachedEntry::decode(&bytes);
        if entry.is_none() {
            warn!(cache = self.kind(), key = %key, "discarding undecodable cache entry");
        }
        entry
    }

    pub async fn put_entry(
        &self,
        key: &CacheKey,
        entry: &CachedEntry,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.set(key.as_str(), entry.encode()?, ttl).await
    }
}
