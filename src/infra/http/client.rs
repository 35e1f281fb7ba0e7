use std::{convert::Infallible, net::SocketAddr};

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{Extensions, HeaderMap, header::USER_AGENT, request::Parts},
};

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Client address, preferring proxy headers over the peer socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAddr(pub String);

impl ClientAddr {
    pub fn from_parts(headers: &HeaderMap, extensions: &Extensions) -> Option<Self> {
        forwarded_for(headers)
            .or_else(|| {
                extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
            })
            .map(Self)
    }
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    let first_listed = headers
        .get(X_FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    first_listed
        .or_else(|| {
            headers
                .get(X_REAL_IP)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
        })
        .map(str::to_string)
}

/// Who is asking: address plus declared user agent.
#[derive(Debug, Clone)]
pub struct Visitor {
    pub ip: String,
    pub user_agent: String,
}

impl<S> FromRequestParts<S> for Visitor
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip = ClientAddr::from_parts(&parts.headers, &parts.extensions)
            .map(|addr| addr.0)
            .unwrap_or_else(|| "unknown".to_string());
        let user_agent = parts
            .headers
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        Ok(Self { ip, user_agent })
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn prefers_first_forwarded_address() {
        let mut headers = HeaderMap::new();
        headers.insert(
            X_FORWARDED_FOR,
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert(X_REAL_IP, HeaderValue::from_static("10.0.0.2"));
        let addr = ClientAddr::from_parts(&headers, &Extensions::new());
        assert_eq!(addr, Some(ClientAddr("203.0.113.7".into())));
    }

    #[test]
    fn falls_back_to_real_ip_then_peer() {
        let mut headers = HeaderMap::new();
        headers.insert(X_REAL_IP, HeaderValue::from_static("10.0.0.2"));
        assert_eq!(
            ClientAddr::from_parts(&headers, &Extensions::new()),
            Some(ClientAddr("10.0.0.2".into()))
        );

        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 4000))));
        assert_eq!(
            ClientAddr::from_parts(&HeaderMap::new(), &extensions),
            Some(ClientAddr("192.0.2.1".into()))
        );
        assert_eq!(ClientAddr::from_parts(&HeaderMap::new(), &Extensions::new()), None);
    }
}
