//! Compressed values split across several backend keys.
//!
//! A value written under `base` is zlib-compressed and stored as
//! `base.0`, `base.1`, ... up to `max_chunks` slots. Reads fetch every slot
//! in one batch and stop at the first missing index, so an incompletely
//! written or partially evicted value is reported as absent instead of being
//! returned corrupted.

use std::{io::Write, sync::Arc, time::Duration};

use bytes::{Bytes, BytesMut};
use flate2::{Compression, Decompress, FlushDecompress, Status, write::ZlibEncoder};
use tracing::{debug, warn};

use super::backend::KvBackend;
use super::error::CacheError;
use crate::infra::pool::WorkerPool;

pub struct ChunkedStore {
    backend: Arc<dyn KvBackend>,
    pool: WorkerPool,
    chunk_size: usize,
    max_chunks: usize,
}

impl ChunkedStore {
    pub fn new(
        backend: Arc<dyn KvBackend>,
        pool: WorkerPool,
        chunk_size: usize,
        max_chunks: usize,
    ) -> Self {
        Self {
            backend,
            pool,
            chunk_size: chunk_size.max(1),
            max_chunks: max_chunks.max(1),
        }
    }

    pub async fn put(&self, base: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError> {
        let compressed = self.pool.run_blocking(move || compress(&value)).await??;

        let chunks = chunk_count(compressed.len(), self.chunk_size);
        if chunks > self.max_chunks {
            return Err(CacheError::CapacityExceeded {
                chunks,
                max_chunks: self.max_chunks,
            });
        }

        let values = (0..chunks)
            .map(|index| {
                let start = index * self.chunk_size;
                let end = (start + self.chunk_size).min(compressed.len());
                (chunk_key(base, index), compressed.slice(start..end))
            })
            .collect::<Vec<_>>();

        debug!(
            cache = "chunked",
            key = base,
            chunks,
            compressed_bytes = compressed.len(),
            "writing chunked value"
        );
        self.pool
            .run(self.backend.set_many(values, ttl))
            .await??;
        Ok(())
    }

    /// Returns `Ok(None)` for a missing, truncated or undecodable value.
    pub async fn get(&self, base: &str) -> Result<Option<Bytes>, CacheError> {
        let keys = (0..self.max_chunks)
            .map(|index| chunk_key(base, index))
            .collect::<Vec<_>>();
        let slots = self.pool.run(self.backend.get_many(&keys)).await??;

        let Some(compressed) = assemble(slots) else {
            return Ok(None);
        };

        let key = base.to_string();
        let decoded = self
            .pool
            .run_blocking(move || decompress(&compressed))
            .await?;
        match decoded {
            Ok(value) => Ok(Some(value)),
            Err(reason) => {
                warn!(cache = "chunked", key = %key, reason, "discarding unreadable cached value");
                Ok(None)
            }
        }
    }

    /// Unchunked, uncompressed write-if-absent.
    pub async fn add(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool, CacheError> {
        self.pool.run(self.backend.add(key, value, ttl)).await?
    }

    pub async fn increment(&self, key: &str) -> Result<Option<i64>, CacheError> {
        self.pool.run(self.backend.increment(key)).await?
    }
}

fn chunk_key(base: &str, index: usize) -> String {
    format!("{base}.{index}")
}

fn chunk_count(len: usize, chunk_size: usize) -> usize {
    len.div_ceil(chunk_size)
}

/// Concatenate the leading run of present chunks.
fn assemble(slots: Vec<Option<Bytes>>) -> Option<Bytes> {
    let mut buffer = BytesMut::new();
    let mut present = 0;
    for chunk in slots.into_iter().map_while(|slot| slot) {
        buffer.extend_from_slice(&chunk);
        present += 1;
    }
    (present > 0).then(|| buffer.freeze())
}

fn compress(value: &[u8]) -> Result<Bytes, CacheError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(value)
        .map_err(|err| CacheError::Encode(err.to_string()))?;
    encoder
        .finish()
        .map(Bytes::from)
        .map_err(|err| CacheError::Encode(err.to_string()))
}

/// Inflate a complete zlib stream. A stream that ends before its trailer is
/// reported as truncated.
fn decompress(input: &[u8]) -> Result<Bytes, &'static str> {
    let mut inflater = Decompress::new(true);
    let mut output = Vec::with_capacity(input.len().saturating_mul(4));

    loop {
        if output.len() == output.capacity() {
            output.reserve(output.capacity().max(4096));
        }
        let consumed = inflater.total_in() as usize;
        let produced = inflater.total_out();
        let status = inflater
            .decompress_vec(&input[consumed..], &mut output, FlushDecompress::None)
            .map_err(|_| "corrupt")?;

        match status {
            Status::StreamEnd => return Ok(Bytes::from(output)),
            _ if inflater.total_in() as usize == consumed
                && inflater.total_out() == produced
                && output.len() < output.capacity() =>
            {
                return Err("truncated");
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::*;
    use crate::cache::memory::MemoryStore;

    fn store(chunk_size: usize, max_chunks: usize) -> (Arc<MemoryStore>, ChunkedStore) {
        let backend = Arc::new(MemoryStore::new(NonZeroUsize::new(64).expect("capacity")));
        let pool = WorkerPool::new("cache-test", NonZeroUsize::new(1).expect("workers"));
        let chunked = ChunkedStore::new(backend.clone(), pool, chunk_size, max_chunks);
        (backend, chunked)
    }

    /// Deterministic bytes that zlib cannot shrink.
    fn noise(len: usize) -> Bytes {
        let mut state: u32 = 0x2545_f491;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 24) as u8
            })
            .collect::<Vec<_>>()
            .into()
    }

    #[test]
    fn counts_partial_chunks() {
        assert_eq!(chunk_count(0, 64), 0);
        assert_eq!(chunk_count(64, 64), 1);
        assert_eq!(chunk_count(4 * 64 + 1, 64), 5);
    }

    #[test]
    fn assemble_stops_at_first_hole() {
        let slots = vec![
            Some(Bytes::from_static(b"ab")),
            Some(Bytes::from_static(b"cd")),
            None,
            Some(Bytes::from_static(b"ef")),
        ];
        assert_eq!(assemble(slots), Some(Bytes::from_static(b"abcd")));
        assert_eq!(assemble(vec![None, Some(Bytes::from_static(b"x"))]), None);
    }

    #[tokio::test]
    async fn round_trips_large_values() {
        let (_, store) = store(64, 32);
        let value = noise(1200);
        store
            .put("page", value.clone(), Duration::ZERO)
            .await
            .expect("put");
        assert_eq!(store.get("page").await.expect("get"), Some(value));
    }

    #[tokio::test]
    async fn compressible_values_use_few_chunks() {
        let (backend, store) = store(64, 4);
        let value = Bytes::from("<p>same line</p>\n".repeat(400));
        store
            .put("page", value.clone(), Duration::ZERO)
            .await
            .expect("fits after compression");
        assert!(backend.get("page.0").is_some());
        assert_eq!(store.get("page").await.expect("get"), Some(value));
    }

    #[tokio::test]
    async fn oversize_values_are_rejected_without_writing() {
        let (backend, store) = store(64, 4);
        let err = store
            .put("big", noise(64 * 4 + 64), Duration::ZERO)
            .await
            .expect_err("too large");
        assert!(matches!(err, CacheError::CapacityExceeded { max_chunks: 4, .. }));
        assert!(backend.is_empty());
        assert_eq!(store.get("big").await.expect("get"), None);
    }

    #[tokio::test]
    async fn capacity_boundary_is_exact() {
        let value = noise(600);
        let compressed_len = compress(&value).expect("compress").len();

        let (_, exact) = store(compressed_len, 1);
        exact
            .put("page", value.clone(), Duration::ZERO)
            .await
            .expect("exact fit is accepted");
        assert_eq!(exact.get("page").await.expect("get"), Some(value.clone()));

        let (backend, short) = store(compressed_len - 1, 1);
        let err = short
            .put("page", value, Duration::ZERO)
            .await
            .expect_err("one byte over");
        assert!(matches!(
            err,
            CacheError::CapacityExceeded { chunks: 2, max_chunks: 1 }
        ));
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn missing_middle_chunk_reads_as_absent() {
        let (backend, store) = store(64, 16);
        store
            .put("page", noise(64 * 4), Duration::ZERO)
            .await
            .expect("put");
        assert!(backend.remove("page.2"));
        assert_eq!(store.get("page").await.expect("get"), None);
    }

    #[tokio::test]
    async fn absent_values_read_as_none() {
        let (_, store) = store(64, 4);
        assert_eq!(store.get("nothing").await.expect("get"), None);
    }

    #[tokio::test]
    async fn counters_bypass_chunking() {
        let (backend, store) = store(64, 4);
        assert!(store
            .add("rate-limit:a", Bytes::from_static(b"1"), Duration::from_secs(60))
            .await
            .expect("add"));
        assert_eq!(backend.get("rate-limit:a"), Some(Bytes::from_static(b"1")));
        assert_eq!(store.increment("rate-limit:a").await.expect("incr"), Some(2));
    }

    #[test]
    fn decompress_detects_truncation() {
        let compressed = compress(&noise(2048)).expect("compress");
        let cut = &compressed[..compressed.len() / 2];
        assert_eq!(decompress(cut), Err("truncated"));
        assert_eq!(decompress(&compressed).map(|b| b.len()), Ok(2048));
    }
}
