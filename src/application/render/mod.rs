//! Cache-aware rendering.
//!
//! [`RenderOrchestrator`] decides whether a request is answered from the
//! cache, from an in-flight render or by a new one. [`RenderService`] is the
//! fetch + convert step it runs on a miss.

mod orchestrator;
mod pending;
mod service;
mod ttl;
mod types;

pub use orchestrator::{
    METRIC_CACHE_HIT_TOTAL, METRIC_CACHE_MISS_TOTAL, METRIC_CACHE_WRITE_FAILED_TOTAL,
    METRIC_COALESCED_WAIT_TOTAL, METRIC_RATE_LIMITED_TOTAL, METRIC_RENDER_DETACHED_TOTAL,
    METRIC_RENDER_FAILED_TOTAL, METRIC_RENDER_MS, METRIC_RENDER_TOTAL, RenderOrchestrator,
};
pub use pending::{Claim, PendingRenders, PendingSignal, RenderGuard};
pub use service::{MarkdownRenderer, RenderService, Renderer, SourceFormat};
pub use ttl::TtlPolicy;
pub use types::{
    HTML_CONTENT_TYPE, RenderError, RenderOutcome, RenderRequest, RenderedContent,
};
