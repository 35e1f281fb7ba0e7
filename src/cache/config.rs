//! Cache backend selection.

use std::num::NonZeroUsize;

use crate::config::{CacheBackendKind, CacheSettings};

pub const DEFAULT_MEMORY_LIMIT: usize = 256;
pub const DEFAULT_CHUNK_SIZE: usize = 950_000;
pub const DEFAULT_MAX_CHUNKS: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendChoice {
    Disabled,
    Memory { limit: NonZeroUsize },
    Redis { url: String },
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: BackendChoice,
    pub chunk_size: NonZeroUsize,
    pub max_chunks: NonZeroUsize,
    pub io_workers: NonZeroUsize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: BackendChoice::Memory {
                limit: NonZeroUsize::new(DEFAULT_MEMORY_LIMIT).unwrap_or(NonZeroUsize::MIN),
            },
            chunk_size: NonZeroUsize::new(DEFAULT_CHUNK_SIZE).unwrap_or(NonZeroUsize::MIN),
            max_chunks: NonZeroUsize::new(DEFAULT_MAX_CHUNKS).unwrap_or(NonZeroUsize::MIN),
            io_workers: NonZeroUsize::MIN,
        }
    }
}

impl From<&CacheSettings> for CacheConfig {
    fn from(settings: &CacheSettings) -> Self {
        let backend = match settings.backend {
            CacheBackendKind::Disabled => BackendChoice::Disabled,
            CacheBackendKind::Memory => BackendChoice::Memory {
                limit: settings.memory_limit,
            },
            CacheBackendKind::Redis => BackendChoice::Redis {
                url: settings.redis_url.clone(),
            },
        };
        Self {
            backend,
            chunk_size: settings.chunk_size,
            max_chunks: settings.max_chunks,
            io_workers: settings.io_workers,
        }
    }
}
