//! Redis implementation of the raw key/value backend.
//!
//! The connection is established lazily on first use, so the gateway starts
//! (and keeps serving uncached) while Redis is down.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::{Client, Script, aio::ConnectionManager};
use tokio::sync::OnceCell;
use tracing::info;

use super::backend::KvBackend;
use super::error::CacheError;

const INCREMENT_IF_PRESENT: &str = r#"
if redis.call("EXISTS", KEYS[1]) == 1 then
    return redis.call("INCR", KEYS[1])
end
return false
"#;

pub struct RedisBackend {
    client: Client,
    connection: OnceCell<ConnectionManager>,
    increment: Script,
}

impl RedisBackend {
    /// Parse the connection URL. No network I/O happens here.
    pub fn new(url: &str) -> Result<Self, CacheError> {
        let client = Client::open(url)?;
        Ok(Self {
            client,
            connection: OnceCell::new(),
            increment: Script::new(INCREMENT_IF_PRESENT),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, CacheError> {
        let manager = self
            .connection
            .get_or_try_init(|| async {
                let manager = self.client.get_connection_manager().await?;
                info!(cache = "redis", "connected to cache backend");
                Ok::<_, CacheError>(manager)
            })
            .await?;
        Ok(manager.clone())
    }
}

fn expiry_seconds(ttl: Duration) -> Option<u64> {
    (!ttl.is_zero()).then(|| ttl.as_secs().max(1))
}

#[async_trait]
impl KvBackend for RedisBackend {
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>, CacheError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;

        let mut cmd = redis::cmd("MGET");
        for key in keys {
            cmd.arg(key);
        }
        let values: Vec<Option<Vec<u8>>> = cmd.query_async(&mut conn).await?;
        Ok(values.into_iter().map(|value| value.map(Bytes::from)).collect())
    }

    async fn set_many(
        &self,
        values: Vec<(String, Bytes)>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        if values.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in &values {
            pipe.cmd("SET").arg(key).arg(value.as_ref());
            if let Some(seconds) = expiry_seconds(ttl) {
                pipe.arg("EX").arg(seconds);
            }
            pipe.ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn add(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool, CacheError> {
        let mut conn = self.connection().await?;

        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value.as_ref()).arg("NX");
        if let Some(seconds) = expiry_seconds(ttl) {
            cmd.arg("EX").arg(seconds);
        }
        let reply: Option<String> = cmd.query_async(&mut conn).await?;
        Ok(reply.is_some())
    }

    async fn increment(&self, key: &str) -> Result<Option<i64>, CacheError> {
        let mut conn = self.connection().await?;
        let count: Option<i64> = self.increment.key(key).invoke_async(&mut conn).await?;
        Ok(count)
    }
}
