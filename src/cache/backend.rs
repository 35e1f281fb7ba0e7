//! Raw key/value backend contract used beneath the chunked store.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::error::CacheError;

/// A size-limited external key/value store.
///
/// A `ttl` of zero means the value never expires on its own.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Fetch several keys in one round trip. The result has one slot per key,
    /// in the same order.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>, CacheError>;

    /// Write several keys in one round trip, all with the same expiry.
    async fn set_many(&self, values: Vec<(String, Bytes)>, ttl: Duration)
    -> Result<(), CacheError>;

    /// Store `value` only if `key` is absent. Must be atomic.
    async fn add(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool, CacheError>;

    /// Atomically increment an integer value, returning `None` if the key does
    /// not exist.
    async fn increment(&self, key: &str) -> Result<Option<i64>, CacheError>;
}
