//! Transport-neutral request handed to the pipeline.

use axum::{
    async_trait,
    body::Bytes,
    extract::{ConnectInfo, FromRequest, Request},
    http::{HeaderMap, HeaderName, HeaderValue, Method},
};
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

/// Largest request body the pipeline will buffer.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Method, path, headers and buffered body of one request.
///
/// A body that could not be read is kept as `body_error` so the validation
/// stage rejects it and still records a sample.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub body_error: Option<String>,
    pub client_ip: Option<IpAddr>,
}

impl PipelineRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            body_error: None,
            client_ip: None,
        }
    }

    /// Add a header. Invalid names or values are skipped.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn json(self, value: &serde_json::Value) -> Self {
        self.header("content-type", "application/json")
            .body(value.to_string())
    }

    pub fn client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    /// Rate-limit identity for anonymous callers.
    pub fn anonymous_identity(&self) -> String {
        match self.client_ip {
            Some(ip) => format!("ip:{ip}"),
            None => "ip:unknown".to_string(),
        }
    }
}

/// Client IP, preferring proxy headers over the socket address.
pub fn extract_client_ip(headers: &HeaderMap, fallback: Option<SocketAddr>) -> Option<IpAddr> {
    // X-Forwarded-For can contain multiple IPs, take the first one
    if let Some(ip) = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|first| first.trim().parse().ok())
    {
        return Some(ip);
    }

    if let Some(ip) = headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
    {
        return Some(ip);
    }

    fallback.map(|addr| addr.ip())
}

#[async_trait]
impl<S> FromRequest<S> for PipelineRequest
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request(req: Request, _state: &S) -> Result<Self, Self::Rejection> {
        let (parts, body) = req.into_parts();
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0);

        let (body, body_error) = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
            Ok(bytes) => (bytes, None),
            Err(e) => (Bytes::new(), Some(e.to_string())),
        };

        Ok(Self {
            client_ip: extract_client_ip(&parts.headers, peer),
            method: parts.method,
            path: parts.uri.path().to_string(),
            headers: parts.headers,
            body,
            body_error,
        })
    }
}
