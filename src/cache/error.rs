use thiserror::Error;

use crate::infra::pool::PoolError;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("value needs {chunks} chunks but at most {max_chunks} are allowed")]
    CapacityExceeded { chunks: usize, max_chunks: usize },
    #[error("cache backend unavailable: {0}")]
    Backend(String),
    #[error("failed to encode cache value: {0}")]
    Encode(String),
    #[error("value stored under `{key}` is not an integer")]
    NotAnInteger { key: String },
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl CacheError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Short label used in log fields and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::Backend(_) => "backend_unavailable",
            Self::Encode(_) => "encode",
            Self::NotAnInteger { .. } => "not_an_integer",
            Self::Pool(_) => "pool",
        }
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}
