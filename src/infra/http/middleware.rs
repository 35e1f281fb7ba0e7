use tokio::time::Instant;

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::application::error::ErrorReport;
use crate::infra::http::client::ClientAddr;

const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
}

/// Tag the request with an id and echo it back as `x-request-id`.
pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let ctx = RequestContext {
        request_id: Uuid::new_v4().to_string(),
    };
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response.extensions_mut().insert(ctx);
    response
}

pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let client_ip = ClientAddr::from_parts(request.headers(), request.extensions())
        .map(|addr| addr.0)
        .unwrap_or_default();
    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();

    let mut response = next.run(request).await;
    let status = response.status().as_u16();
    let elapsed_ms = started.elapsed().as_millis() as u64;

    if !(response.status().is_client_error() || response.status().is_server_error()) {
        debug!(
            target = "rendergate::http::access",
            status,
            method = %method,
            path = %path,
            elapsed_ms,
            request_id = %request_id,
            client_ip = %client_ip,
            "served"
        );
        return response;
    }

    let failure = Failure::from(response.extensions_mut().remove::<ErrorReport>());
    if response.status().is_server_error() {
        error!(
            target = "rendergate::http::response",
            status,
            method = %method,
            path = %path,
            elapsed_ms,
            source = failure.source,
            detail = %failure.detail,
            chain = ?failure.chain,
            request_id = %request_id,
            client_ip = %client_ip,
            "request failed"
        );
    } else {
        warn!(
            target = "rendergate::http::response",
            status,
            method = %method,
            path = %path,
            elapsed_ms,
            source = failure.source,
            detail = %failure.detail,
            request_id = %request_id,
            client_ip = %client_ip,
            "client request error"
        );
    }

    response
}

struct Failure {
    source: &'static str,
    detail: String,
    chain: Vec<String>,
}

impl From<Option<ErrorReport>> for Failure {
    fn from(report: Option<ErrorReport>) -> Self {
        match report {
            Some(report) => Self {
                source: report.source,
                detail: report
                    .messages
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "no diagnostic available".to_string()),
                chain: report.messages,
            },
            None => Self {
                source: "unknown",
                detail: "no diagnostic available".to_string(),
                chain: Vec::new(),
            },
        }
    }
}
