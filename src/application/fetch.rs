//! Source providers: remote URLs and a local directory.

use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use bytes::Bytes;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::application::render::RenderError;

#[derive(Clone)]
pub struct UrlFetcher {
    client: Client,
}

impl UrlFetcher {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("rendergate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// `target` is `{host}/{path}`; it is always fetched over HTTPS.
    pub fn resolve(target: &str) -> Result<Url, RenderError> {
        let url = Url::parse(&format!("https://{target}")).map_err(|err| {
            RenderError::Upstream {
                status: 400,
                message: format!("invalid target `{target}`: {err}"),
            }
        })?;
        if url.host_str().is_none_or(str::is_empty) {
            return Err(RenderError::Upstream {
                status: 400,
                message: format!("target `{target}` has no host"),
            });
        }
        Ok(url)
    }

    pub async fn fetch(&self, target: &str) -> Result<Bytes, RenderError> {
        let url = Self::resolve(target)?;
        debug!(url = %url, "fetching remote source");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(RenderError::Upstream {
                status: status.as_u16(),
                message: status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string(),
            });
        }
        response.bytes().await.map_err(transport_error)
    }
}

fn transport_error(err: reqwest::Error) -> RenderError {
    if err.is_timeout() {
        RenderError::Unreachable("request timed out".to_string())
    } else {
        RenderError::Unreachable(err.to_string())
    }
}

/// Files below a fixed root directory.
#[derive(Debug, Clone)]
pub struct LocalFiles {
    root: PathBuf,
}

impl LocalFiles {
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = std::fs::canonicalize(root)?;
        Ok(Self { root })
    }

    pub async fn fetch(&self, relative: &str) -> Result<Bytes, RenderError> {
        let path = self.resolve(relative).await?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|_| RenderError::NotFound(relative.to_string()))?;
        Ok(Bytes::from(bytes))
    }

    /// Canonicalise `relative` and refuse anything that escapes the root.
    async fn resolve(&self, relative: &str) -> Result<PathBuf, RenderError> {
        let not_found = || RenderError::NotFound(relative.to_string());

        let candidate = self.root.join(relative.trim_start_matches('/'));
        let canonical = tokio::fs::canonicalize(&candidate)
            .await
            .map_err(|_| not_found())?;
        if !canonical.starts_with(&self.root) {
            return Err(not_found());
        }
        match tokio::fs::metadata(&canonical).await {
            Ok(metadata) if metadata.is_file() => Ok(canonical),
            _ => Err(not_found()),
        }
    }
}
