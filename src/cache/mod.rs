//! Response cache.
//!
//! A single [`KeyValueCache`] is chosen at startup from configuration:
//!
//! - **disabled**: every read misses, every write succeeds and is dropped.
//! - **memory**: bounded in-process store, oldest write evicted first.
//! - **redis**: values compressed and split into chunks so each backend
//!   record stays under the per-value ceiling.
//!
//! ```toml
//! [cache]
//! backend = "redis"
//! redis_url = "redis://127.0.0.1:6379/"
//! chunk_size = 950000
//! max_chunks = 16
//! ```

mod backend;
mod chunked;
mod config;
mod entry;
mod error;
mod facade;
mod keys;
mod lock;
mod memory;
mod redis_backend;

pub use backend::KvBackend;
pub use chunked::ChunkedStore;
pub use config::{
    BackendChoice, CacheConfig, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CHUNKS, DEFAULT_MEMORY_LIMIT,
};
pub use entry::CachedEntry;
pub use error::CacheError;
pub use facade::KeyValueCache;
pub use keys::{CacheKey, rate_limit_key, visitor_fingerprint};
pub use memory::{METRIC_CACHE_EVICT_TOTAL, MemoryStore};
pub use redis_backend::RedisBackend;
