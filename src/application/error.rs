use std::{borrow::Cow, error::Error as StdError};

use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{application::render::RenderError, infra::error::InfraError};

/// Diagnostic chain attached to error responses for the access log.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: Cow<'static, str>,
    retry_after: Option<u64>,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        public_message: impl Into<Cow<'static, str>>,
        detail: impl Into<String>,
    ) -> Self {
        let report = ErrorReport::from_message(source, status, detail);
        Self {
            status,
            public_message: public_message.into(),
            retry_after: None,
            report,
        }
    }

    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: impl Into<Cow<'static, str>>,
        error: &dyn StdError,
    ) -> Self {
        let report = ErrorReport::from_error(source, status, error);
        Self {
            status,
            public_message: public_message.into(),
            retry_after: None,
            report,
        }
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.public_message.into_owned()).into_response();
        if let Some(seconds) = self.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        self.report.attach(&mut response);
        response
    }
}

impl From<RenderError> for HttpError {
    fn from(error: RenderError) -> Self {
        const SOURCE: &str = "application::error::render_error_to_http_error";
        match &error {
            RenderError::RateLimited {
                ip,
                limit,
                minutes,
                retry_after_secs,
            } => HttpError::from_error(
                SOURCE,
                StatusCode::TOO_MANY_REQUESTS,
                format!(
                    "Rate limit exceeded for {ip} ({limit} req / {minutes} min). Try again later."
                ),
                &error,
            )
            .with_retry_after(*retry_after_secs),
            RenderError::Upstream { status: 404, .. } | RenderError::NotFound(_) => {
                HttpError::from_error(SOURCE, StatusCode::NOT_FOUND, "Resource not found", &error)
            }
            RenderError::Upstream { status, .. } if *status >= 500 => HttpError::from_error(
                SOURCE,
                StatusCode::BAD_GATEWAY,
                "Upstream server error",
                &error,
            ),
            RenderError::Upstream { .. } => HttpError::from_error(
                SOURCE,
                StatusCode::BAD_REQUEST,
                "Upstream rejected the request",
                &error,
            ),
            RenderError::Unreachable(_) => HttpError::from_error(
                SOURCE,
                StatusCode::BAD_GATEWAY,
                "Upstream could not be reached",
                &error,
            ),
            RenderError::Render(_) => HttpError::from_error(
                SOURCE,
                StatusCode::BAD_REQUEST,
                "Document could not be rendered",
                &error,
            ),
            RenderError::Worker(_) => HttpError::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
                &error,
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(error: RenderError) -> StatusCode {
        HttpError::from(error).into_response().status()
    }

    #[test]
    fn maps_render_errors_to_statuses() {
        let upstream = |status| RenderError::Upstream {
            status,
            message: String::new(),
        };
        assert_eq!(status_of(upstream(404)), StatusCode::NOT_FOUND);
        assert_eq!(status_of(upstream(503)), StatusCode::BAD_GATEWAY);
        assert_eq!(status_of(upstream(403)), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(RenderError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_of(RenderError::render("bad")), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(RenderError::Unreachable("dns".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(RenderError::Worker("join".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn rate_limit_carries_retry_after_and_report() {
        let response = HttpError::from(RenderError::RateLimited {
            ip: "10.0.0.1".into(),
            limit: 60,
            minutes: 10,
            retry_after_secs: 600,
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER),
            Some(&HeaderValue::from_static("600"))
        );
        let report = response
            .extensions()
            .get::<ErrorReport>()
            .expect("report attached");
        assert_eq!(report.status, StatusCode::TOO_MANY_REQUESTS);
    }
}
