use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    body::Body,
    extract::{Path, Query, State},
    http::{
        HeaderName, HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_TYPE, RETRY_AFTER},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tracing::warn;

use crate::{
    application::{
        error::HttpError,
        fetch::{LocalFiles, UrlFetcher},
        render::{
            RenderError, RenderOrchestrator, RenderOutcome, RenderRequest, RenderService,
            RenderedContent,
        },
    },
    cache::CachedEntry,
    presentation::views::{StillWorkingTemplate, render_template_response},
};

use super::{
    client::Visitor,
    middleware::{log_responses, set_request_context},
};

#[derive(Clone)]
pub struct HttpState {
    pub orchestrator: Arc<RenderOrchestrator>,
    pub renderer: RenderService,
    pub urls: UrlFetcher,
    pub local: Option<LocalFiles>,
}

pub fn build_router(state: HttpState) -> Router {
    let render_routes = Router::new()
        .route("/url/{*target}", get(url_resource))
        .route("/localfile/{*path}", get(local_resource));

    Router::new()
        .merge(render_routes)
        .route("/_health", get(health))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RenderQuery {
    flush_cache: Option<String>,
}

impl RenderQuery {
    fn force_refresh(&self) -> bool {
        self.flush_cache.as_deref().is_some_and(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
    }
}

async fn url_resource(
    State(state): State<HttpState>,
    Path(target): Path<String>,
    Query(query): Query<RenderQuery>,
    visitor: Visitor,
) -> Response {
    let request = RenderRequest::new(format!("/url/{target}"), visitor.ip, &visitor.user_agent)
        .with_force_refresh(query.force_refresh());

    let urls = state.urls.clone();
    let renderer = state.renderer.clone();
    let outcome = state
        .orchestrator
        .serve(request, move || async move {
            let fetch = urls.fetch(&target);
            renderer.fetch_and_render(target.clone(), fetch).await
        })
        .await;
    respond(outcome)
}

async fn local_resource(
    State(state): State<HttpState>,
    Path(path): Path<String>,
    Query(query): Query<RenderQuery>,
    visitor: Visitor,
) -> Response {
    let Some(files) = state.local.clone() else {
        return HttpError::new(
            "infra::http::public::local_resource",
            StatusCode::NOT_FOUND,
            "Resource not found",
            "local file serving is disabled",
        )
        .into_response();
    };

    let request = RenderRequest::new(format!("/localfile/{path}"), visitor.ip, &visitor.user_agent)
        .with_force_refresh(query.force_refresh());

    let renderer = state.renderer.clone();
    let outcome = state
        .orchestrator
        .serve(request, move || async move {
            let fetch = files.fetch(&path);
            renderer.fetch_and_render(path.clone(), fetch).await
        })
        .await;
    respond(outcome)
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

fn respond(outcome: Result<RenderOutcome, RenderError>) -> Response {
    match outcome {
        Ok(RenderOutcome::Cached(entry)) => cached_response(entry),
        Ok(RenderOutcome::Fresh { content, ttl }) => fresh_response(content, ttl),
        Ok(RenderOutcome::StillWorking { retry_after }) => still_working_response(retry_after),
        Err(err) => HttpError::from(err).into_response(),
    }
}

fn cached_response(entry: CachedEntry) -> Response {
    let CachedEntry { headers, body } = entry;
    let mut response = (StatusCode::OK, Body::from(body)).into_response();
    for (name, value) in headers {
        match (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().insert(name, value);
            }
            _ => warn!(header = %name, "skipping invalid cached header"),
        }
    }
    response
}

fn fresh_response(content: RenderedContent, ttl: Duration) -> Response {
    let RenderedContent { content_type, body } = content;
    let mut response = (StatusCode::OK, Body::from(body)).into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::try_from(content_type) {
        headers.insert(CONTENT_TYPE, value);
    }
    if !ttl.is_zero() {
        if let Ok(value) = HeaderValue::try_from(format!("max-age={}", ttl.as_secs())) {
            headers.insert(CACHE_CONTROL, value);
        }
    }
    response
}

fn still_working_response(retry_after: Duration) -> Response {
    let retry_after_secs = retry_after.as_secs().max(1);
    let mut response = render_template_response(
        StillWorkingTemplate { retry_after_secs },
        StatusCode::ACCEPTED,
    );
    let headers = response.headers_mut();
    headers.insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_cache_accepts_truthy_values() {
        let query = |value: &str| RenderQuery {
            flush_cache: Some(value.to_string()),
        };
        for truthy in ["1", "true", "YES", "on"] {
            assert!(query(truthy).force_refresh(), "{truthy}");
        }
        for falsy in ["", "0", "false", "off", "maybe"] {
            assert!(!query(falsy).force_refresh(), "{falsy}");
        }
        assert!(!RenderQuery::default().force_refresh());
    }

    #[test]
    fn fresh_responses_advertise_ttl() {
        let response = fresh_response(RenderedContent::html("<p>x</p>"), Duration::from_secs(600));
        assert_eq!(response.headers()[CACHE_CONTROL], "max-age=600");
        assert_eq!(response.headers()[CONTENT_TYPE], "text/html; charset=utf-8");

        let response = fresh_response(RenderedContent::html("<p>x</p>"), Duration::ZERO);
        assert!(response.headers().get(CACHE_CONTROL).is_none());
    }

    #[test]
    fn cached_responses_replay_stored_headers() {
        let entry = CachedEntry::new(
            vec![
                ("Content-Type".into(), "text/plain".into()),
                ("bad header".into(), "x".into()),
            ],
            "hello",
        );
        let response = cached_response(entry);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");
        assert_eq!(response.headers().len(), 1);
    }

    #[test]
    fn still_working_is_not_cacheable() {
        let response = still_working_response(Duration::from_secs(15));
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.headers()[RETRY_AFTER], "15");
        assert_eq!(response.headers()[CACHE_CONTROL], "no-store");
    }
}
