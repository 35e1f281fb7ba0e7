use std::{fs, num::NonZeroUsize, path::Path, sync::Arc, time::Duration};

use axum::{
    Router,
    body::Body,
    http::{
        Method, Request, StatusCode,
        header::{CACHE_CONTROL, CONTENT_TYPE, RETRY_AFTER},
    },
    response::Response,
};
use http_body_util::BodyExt;
use rendergate::{
    application::{
        fetch::{LocalFiles, UrlFetcher},
        rate_limit::RateLimiter,
        render::{MarkdownRenderer, RenderOrchestrator, RenderService, TtlPolicy},
    },
    cache::{KeyValueCache, MemoryStore},
    infra::{
        http::{HttpState, build_router},
        pool::WorkerPool,
    },
};
use tempfile::TempDir;
use tower::ServiceExt;

fn router_with(root: Option<&Path>, rate_limit: u32) -> Router {
    let cache = Arc::new(KeyValueCache::Memory(MemoryStore::new(
        NonZeroUsize::new(32).expect("capacity"),
    )));
    let limiter = RateLimiter::new(cache.clone(), rate_limit, Duration::from_secs(600));
    let ttl = TtlPolicy::new(Duration::from_secs(600), Duration::from_secs(7200));
    let orchestrator = Arc::new(RenderOrchestrator::new(
        cache,
        limiter,
        ttl,
        Some(Duration::from_secs(15)),
    ));
    let renderer = RenderService::new(
        WorkerPool::new("render-test", NonZeroUsize::new(2).expect("workers")),
        Arc::new(MarkdownRenderer::new()),
    );

    build_router(HttpState {
        orchestrator,
        renderer,
        urls: UrlFetcher::new(Duration::from_secs(5)).expect("http client"),
        local: root.map(|root| LocalFiles::new(root).expect("local root")),
    })
}

fn docs() -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("guide.md"), "# Guide\n\nFirst edition.").expect("write guide");
    fs::write(dir.path().join("notes.md"), "Some *notes*.").expect("write notes");
    dir
}

async fn get(app: &Router, uri: &str, client: &str) -> Response {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header("x-forwarded-for", client)
        .header("user-agent", "gateway-test")
        .body(Body::empty())
        .expect("request should build");
    app.clone()
        .oneshot(request)
        .await
        .expect("router should respond")
}

async fn body_text(response: Response) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body should collect")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

#[tokio::test]
async fn local_document_renders_then_replays_from_cache() {
    let dir = docs();
    let app = router_with(Some(dir.path()), 0);

    let first = get(&app, "/localfile/guide.md", "203.0.113.7").await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()[CACHE_CONTROL], "max-age=600");
    assert_eq!(first.headers()[CONTENT_TYPE], "text/html; charset=utf-8");
    let first_body = body_text(first).await;
    assert!(first_body.contains("<h1>Guide</h1>"), "{first_body}");
    assert!(first_body.contains("First edition."));

    fs::write(dir.path().join("guide.md"), "# Guide\n\nSecond edition.").expect("rewrite");

    let second = get(&app, "/localfile/guide.md", "203.0.113.7").await;
    assert_eq!(second.status(), StatusCode::OK);
    assert!(second.headers().get(CACHE_CONTROL).is_none());
    assert_eq!(second.headers()[CONTENT_TYPE], "text/html; charset=utf-8");
    assert_eq!(body_text(second).await, first_body);

    let refreshed = get(&app, "/localfile/guide.md?flush_cache=1", "203.0.113.7").await;
    assert_eq!(refreshed.status(), StatusCode::OK);
    assert!(body_text(refreshed).await.contains("Second edition."));

    let after = get(&app, "/localfile/guide.md", "203.0.113.7").await;
    assert!(body_text(after).await.contains("Second edition."));
}

#[tokio::test]
async fn missing_and_escaping_paths_are_not_found() {
    let dir = docs();
    let outside = tempfile::NamedTempFile::new().expect("outside file");
    let app = router_with(Some(dir.path()), 0);

    let missing = get(&app, "/localfile/absent.md", "203.0.113.7").await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let escape = format!(
        "/localfile/../{}",
        outside
            .path()
            .file_name()
            .and_then(|name| name.to_str())
            .expect("file name")
    );
    let escaped = get(&app, &escape, "203.0.113.7").await;
    assert_eq!(escaped.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn local_route_is_disabled_without_a_root() {
    let app = router_with(None, 0);
    let response = get(&app, "/localfile/guide.md", "203.0.113.7").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn binary_sources_are_rejected() {
    let dir = docs();
    fs::write(dir.path().join("blob.bin"), [0xff, 0xfe, 0x00, 0x81]).expect("write blob");
    let app = router_with(Some(dir.path()), 0);

    let response = get(&app, "/localfile/blob.bin", "203.0.113.7").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn visitors_over_the_limit_get_429() {
    let dir = docs();
    let app = router_with(Some(dir.path()), 1);

    let allowed = get(&app, "/localfile/guide.md", "198.51.100.1").await;
    assert_eq!(allowed.status(), StatusCode::OK);

    let limited = get(&app, "/localfile/notes.md", "198.51.100.1").await;
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(limited.headers().contains_key(RETRY_AFTER));
    let message = body_text(limited).await;
    assert!(message.contains("198.51.100.1"), "{message}");

    // Cached documents are served without consulting the limiter.
    let cached = get(&app, "/localfile/guide.md", "198.51.100.1").await;
    assert_eq!(cached.status(), StatusCode::OK);

    let other_visitor = get(&app, "/localfile/notes.md", "198.51.100.2").await;
    assert_eq!(other_visitor.status(), StatusCode::OK);
}

#[tokio::test]
async fn health_check_is_empty() {
    let app = router_with(None, 0);
    let response = get(&app, "/_health", "203.0.113.7").await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}
