//! Fetch + render pipeline run on the bounded render pool.

mod config;

use std::{future::Future, sync::Arc};

use askama::Template;
use bytes::Bytes;
use tracing::debug;

use crate::application::render::types::{RenderError, RenderedContent};
use crate::infra::pool::WorkerPool;
use crate::presentation::views::DocumentTemplate;

use config::{build_sanitizer, default_options};

/// How fetched bytes are interpreted, picked from the origin's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Markdown,
    PlainText,
}

impl SourceFormat {
    /// Anything not recognised as plain text is treated as Markdown.
    pub fn from_origin(origin: &str) -> Self {
        let name = origin.rsplit('/').next().unwrap_or(origin);
        let extension = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase());
        match extension.as_deref() {
            Some("txt" | "text" | "log") => Self::PlainText,
            _ => Self::Markdown,
        }
    }
}

/// Converts fetched source bytes into an HTML fragment.
pub trait Renderer: Send + Sync + 'static {
    fn render(
        &self,
        source: &[u8],
        format: SourceFormat,
        origin: &str,
    ) -> Result<String, RenderError>;
}

/// Markdown renderer with Ammonia sanitisation. Plain text is escaped into a
/// `<pre>` block.
pub struct MarkdownRenderer {
    options: comrak::options::Options<'static>,
    sanitizer: ammonia::Builder<'static>,
}

impl MarkdownRenderer {
    pub fn new() -> Self {
        Self {
            options: default_options(),
            sanitizer: build_sanitizer(),
        }
    }
}

impl Default for MarkdownRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for MarkdownRenderer {
    fn render(
        &self,
        source: &[u8],
        format: SourceFormat,
        origin: &str,
    ) -> Result<String, RenderError> {
        let text = std::str::from_utf8(source)
            .map_err(|err| RenderError::render(format!("{origin} is not UTF-8 text: {err}")))?;
        match format {
            SourceFormat::Markdown => {
                let html = comrak::markdown_to_html(text, &self.options);
                Ok(self.sanitizer.clean(&html).to_string())
            }
            SourceFormat::PlainText => Ok(format!("<pre>{}</pre>", ammonia::clean_text(text))),
        }
    }
}

#[derive(Clone)]
pub struct RenderService {
    pool: WorkerPool,
    renderer: Arc<dyn Renderer>,
}

impl RenderService {
    pub fn new(pool: WorkerPool, renderer: Arc<dyn Renderer>) -> Self {
        Self { pool, renderer }
    }

    /// Fetch with `fetch`, then convert and wrap the result in a page. Both
    /// steps hold a render worker.
    pub async fn fetch_and_render<Fut>(
        &self,
        origin: String,
        fetch: Fut,
    ) -> Result<RenderedContent, RenderError>
    where
        Fut: Future<Output = Result<Bytes, RenderError>>,
    {
        let source = self.pool.run(fetch).await??;
        let format = SourceFormat::from_origin(&origin);
        debug!(origin = %origin, bytes = source.len(), ?format, "fetched source");

        let renderer = Arc::clone(&self.renderer);
        self.pool
            .run_blocking(move || {
                let body = renderer.render(&source, format, &origin)?;
                let page = DocumentTemplate::new(&origin, &body);
                page.render()
                    .map(RenderedContent::html)
                    .map_err(|err| RenderError::render(format!("page template failed: {err}")))
            })
            .await?
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::*;

    fn service() -> RenderService {
        RenderService::new(
            WorkerPool::new("render-test", NonZeroUsize::new(1).expect("workers")),
            Arc::new(MarkdownRenderer::new()),
        )
    }

    #[test]
    fn renders_markdown_and_strips_scripts() {
        let html = MarkdownRenderer::new()
            .render(
                b"# Title\n\n<script>x()</script>\n\n*hi*",
                SourceFormat::Markdown,
                "test.md",
            )
            .expect("render");
        assert!(html.contains("<h1>Title</h1>"));
        assert!(html.contains("<em>hi</em>"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn rejects_binary_input() {
        let err = MarkdownRenderer::new()
            .render(&[0xff, 0xfe, 0x00], SourceFormat::Markdown, "image.png")
            .expect_err("not text");
        assert!(matches!(err, RenderError::Render(_)));
    }

    #[test]
    fn picks_format_from_extension() {
        assert_eq!(SourceFormat::from_origin("example.com/notes.TXT"), SourceFormat::PlainText);
        assert_eq!(SourceFormat::from_origin("example.com/README.md"), SourceFormat::Markdown);
        assert_eq!(SourceFormat::from_origin("v1.2/README"), SourceFormat::Markdown);
    }

    #[test]
    fn plain_text_is_escaped_not_parsed() {
        let html = MarkdownRenderer::new()
            .render(b"*not emphasis* <b>", SourceFormat::PlainText, "notes.txt")
            .expect("render");
        assert!(html.starts_with("<pre>"));
        assert!(!html.contains("<em>"));
        assert!(!html.contains("<b>"));
        assert!(html.contains("&lt;b&gt;"));
    }

    #[tokio::test]
    async fn wraps_output_in_a_page() {
        let content = service()
            .fetch_and_render("example.com/README.md".to_string(), async {
                Ok(Bytes::from_static(b"Hello **world**"))
            })
            .await
            .expect("render");
        let body = std::str::from_utf8(&content.body).expect("utf8");
        assert!(body.starts_with("<!DOCTYPE html>"));
        assert!(body.contains("<strong>world</strong>"));
        assert!(body.contains("example.com/README.md"));
    }

    #[tokio::test]
    async fn fetch_errors_pass_through() {
        let err = service()
            .fetch_and_render("gone".to_string(), async {
                Err(RenderError::NotFound("gone".to_string()))
            })
            .await
            .expect_err("fetch fails");
        assert!(matches!(err, RenderError::NotFound(_)));
    }
}
