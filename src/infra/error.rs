use std::{io, net::SocketAddr, path::PathBuf};

use thiserror::Error;

use crate::cache::CacheError;

/// Bootstrap failures: anything that stops the gateway from starting.
#[derive(Debug, Error)]
pub enum InfraError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },
    #[error("local root {} is unusable: {source}", path.display())]
    LocalRoot { path: PathBuf, source: io::Error },
    #[error("http client could not be built: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
    #[error("configuration error: {message}")]
    Configuration { message: String },
    #[error("cache backend could not be created: {0}")]
    Cache(#[from] CacheError),
}

impl InfraError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }
}
