//! Forwarding engine
//!
//! Relays an accepted request to its resolved [`Endpoint`] and streams the
//! backend's response back. Any failure is reported as a [`ForwardError`];
//! the caller turns it into a 502. Nothing is retried.

use axum::body::{Body, HttpBody};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request, Response};
use futures_util::future::BoxFuture;
use std::net::IpAddr;
use std::time::Duration;
use tracing::debug;

use crate::error::ForwardError;
use crate::resolver::Endpoint;

/// Headers that only apply to a single connection hop
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Performs the byte-level relay for an allowed request.
pub trait Forwarder: Send + Sync {
    fn forward(
        &self,
        req: Request<Body>,
        endpoint: Endpoint,
        client: IpAddr,
    ) -> BoxFuture<'static, Result<Response<Body>, ForwardError>>;
}

/// Forwarder backed by a pooled reqwest client
#[derive(Clone)]
pub struct HttpForwarder {
    client: reqwest::Client,
}

impl HttpForwarder {
    /// Create a forwarder with the given connect timeout
    pub fn new(connect_timeout: Duration) -> Result<Self, ForwardError> {
        // Backends live on localhost and present certificates for their
        // public names, which cannot verify against `localhost`.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(true)
            .connect_timeout(connect_timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ForwardError::Http(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

/// Drops hop-by-hop headers, including any named in `Connection`
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Appends `client` to `X-Forwarded-For`
fn append_forwarded_for(headers: &mut HeaderMap, client: IpAddr) {
    let value = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{}, {}", existing, client),
        None => client.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert("x-forwarded-for", value);
    }
}

impl Forwarder for HttpForwarder {
    fn forward(
        &self,
        req: Request<Body>,
        endpoint: Endpoint,
        client: IpAddr,
    ) -> BoxFuture<'static, Result<Response<Body>, ForwardError>> {
        let http = self.client.clone();

        Box::pin(async move {
            let (mut parts, body) = req.into_parts();
            let path = parts
                .uri
                .path_and_query()
                .map(|p| p.as_str())
                .unwrap_or("/");
            let url = endpoint.url_for(path);
            debug!("Forwarding to: {}", url);

            strip_hop_by_hop(&mut parts.headers);
            append_forwarded_for(&mut parts.headers, client);

            let upstream_body = if body.size_hint().exact() == Some(0) {
                reqwest::Body::from(Vec::<u8>::new())
            } else {
                reqwest::Body::wrap_stream(body.into_data_stream())
            };

            let response = http
                .request(parts.method, &url)
                .headers(parts.headers)
                .body(upstream_body)
                .send()
                .await
                .map_err(|e| ForwardError::BackendConnection(e.to_string()))?;

            let mut builder = Response::builder()
                .status(response.status())
                .version(response.version());
            if let Some(headers) = builder.headers_mut() {
                *headers = response.headers().clone();
            }
            builder
                .body(Body::from_stream(response.bytes_stream()))
                .map_err(|e| ForwardError::Http(e.to_string()))
        })
    }
}
