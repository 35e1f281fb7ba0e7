use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::time::Instant;

use crate::cache::{CacheKey, CachedEntry, visitor_fingerprint};
use crate::infra::pool::PoolError;

pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// One inbound request for a rendered resource.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    /// Canonical request path, query string excluded.
    pub path: String,
    pub client_ip: String,
    pub fingerprint: String,
    pub force_refresh: bool,
    /// Start of the render deadline.
    pub received_at: Instant,
}

impl RenderRequest {
    pub fn new(path: impl Into<String>, client_ip: impl Into<String>, user_agent: &str) -> Self {
        let client_ip = client_ip.into();
        Self {
            path: path.into(),
            fingerprint: visitor_fingerprint(&client_ip, user_agent),
            client_ip,
            force_refresh: false,
            received_at: Instant::now(),
        }
    }

    pub fn with_force_refresh(mut self, force_refresh: bool) -> Self {
        self.force_refresh = force_refresh;
        self
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::for_path(&self.path)
    }
}

/// Output of the fetch + render pipeline, ready to send and to cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedContent {
    pub content_type: String,
    pub body: Bytes,
}

impl RenderedContent {
    pub fn html(body: impl Into<Bytes>) -> Self {
        Self {
            content_type: HTML_CONTENT_TYPE.to_string(),
            body: body.into(),
        }
    }

    /// Only the content type is kept alongside the body.
    pub fn to_entry(&self) -> CachedEntry {
        CachedEntry::new(
            vec![("Content-Type".to_string(), self.content_type.clone())],
            self.body.to_vec(),
        )
    }
}

#[derive(Debug)]
pub enum RenderOutcome {
    /// Replayed from the cache; no render ran.
    Cached(CachedEntry),
    /// Rendered for this request. A zero `ttl` means the result was not
    /// cached.
    Fresh {
        content: RenderedContent,
        ttl: Duration,
    },
    /// The deadline passed first. The render keeps running and will populate
    /// the cache.
    StillWorking { retry_after: Duration },
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("rate limit exceeded for {ip} ({limit} req / {minutes} min)")]
    RateLimited {
        ip: String,
        limit: u32,
        minutes: u64,
        retry_after_secs: u64,
    },
    #[error("upstream responded with {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("upstream could not be reached: {0}")]
    Unreachable(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("document could not be rendered: {0}")]
    Render(String),
    #[error("render worker failed: {0}")]
    Worker(String),
}

impl RenderError {
    pub fn render(message: impl Into<String>) -> Self {
        Self::Render(message.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Upstream { .. } => "upstream",
            Self::Unreachable(_) => "unreachable",
            Self::NotFound(_) => "not_found",
            Self::Render(_) => "render",
            Self::Worker(_) => "worker",
        }
    }
}

impl From<PoolError> for RenderError {
    fn from(err: PoolError) -> Self {
        Self::Worker(err.to_string())
    }
}
