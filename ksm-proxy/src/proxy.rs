//! HTTP/HTTPS front end
//!
//! Accepts connections on the plain and secure listeners, asks the
//! [`ProxyRouter`] for a [`Decision`] and either answers with a short status
//! response or hands the request to the [`Forwarder`].

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderValue, Request, Response, StatusCode},
    response::IntoResponse,
    routing::any,
    Extension, Router,
};
use hyper_util::rt::TokioExecutor;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ListenConfig;
use crate::error::{ProxyError, Result};
use crate::forward::Forwarder;
use crate::policy::PolicyModel;
use crate::resolver::Scheme;
use crate::router::{Decision, Router as ProxyRouter};

/// Shared proxy state
pub struct ProxyState {
    /// Routing decision engine
    pub router: ProxyRouter,
    /// Forwarding engine for allowed requests
    pub forwarder: Arc<dyn Forwarder>,
}

/// Proxy server
pub struct ProxyServer {
    state: Arc<ProxyState>,
    tls_acceptor: Option<TlsAcceptor>,
}

impl ProxyServer {
    /// Create a new proxy server over a policy snapshot
    pub fn new(policy: Arc<PolicyModel>, forwarder: Arc<dyn Forwarder>) -> Self {
        let state = Arc::new(ProxyState {
            router: ProxyRouter::new(policy),
            forwarder,
        });
        Self {
            state,
            tls_acceptor: None,
        }
    }

    /// Enable the secure listener
    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls_acceptor = Some(acceptor);
        self
    }

    /// Build the Axum router for connections arriving with `scheme`
    pub fn router(&self, scheme: Scheme) -> Router {
        Router::new()
            .route("/", any(proxy_handler))
            .route("/*path", any(proxy_handler))
            .layer(Extension(scheme))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind the configured listeners and serve until one of them fails.
    ///
    /// A listener that cannot be bound is skipped; with none left the
    /// server refuses to start.
    pub async fn run(&self, listen: &ListenConfig) -> Result<()> {
        let mut servers = JoinSet::new();

        info!("Configured backends:");
        for backend in self.state.router.policy().backends() {
            let domains: Vec<&str> = backend.domains.iter().map(|d| d.pattern()).collect();
            info!(
                "  {} [{}] -> http:{} https:{}",
                backend.name,
                domains.join(", "),
                backend.http_port,
                backend.https_port
            );
        }

        if listen.http_port != 0 {
            match TcpListener::bind((listen.bind_addr, listen.http_port)).await {
                Ok(listener) => {
                    info!("Starting HTTP server on {}:{}", listen.bind_addr, listen.http_port);
                    servers.spawn(serve_plain(listener, self.router(Scheme::Plain)));
                }
                Err(e) => error!("Failed to bind HTTP port {}: {}", listen.http_port, e),
            }
        }

        if listen.https_port != 0 {
            match &self.tls_acceptor {
                Some(acceptor) => match TcpListener::bind((listen.bind_addr, listen.https_port)).await {
                    Ok(listener) => {
                        info!("Starting HTTPS server on {}:{}", listen.bind_addr, listen.https_port);
                        servers.spawn(serve_tls(listener, acceptor.clone(), self.router(Scheme::Secure)));
                    }
                    Err(e) => error!("Failed to bind HTTPS port {}: {}", listen.https_port, e),
                },
                None => warn!("HTTPS port configured but no usable certificate, skipping"),
            }
        }

        if servers.is_empty() {
            return Err(ProxyError::NoListener);
        }

        while let Some(joined) = servers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(e) => return Err(ProxyError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))),
            }
        }
        Ok(())
    }
}

/// Serve plain HTTP on `listener`
pub async fn serve_plain(listener: TcpListener, router: Router) -> Result<()> {
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(|e| ProxyError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))
}

/// Serve HTTPS on `listener`, terminating TLS with `acceptor`
pub async fn serve_tls(listener: TcpListener, acceptor: TlsAcceptor, router: Router) -> Result<()> {
    use hyper::service::service_fn;
    use tower::ServiceExt;

    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };
        let acceptor = acceptor.clone();
        let router = router.clone();

        tokio::spawn(async move {
            match acceptor.accept(stream).await {
                Ok(tls_stream) => {
                    let io = hyper_util::rt::TokioIo::new(tls_stream);

                    let service = service_fn(move |mut req: Request<hyper::body::Incoming>| {
                        let router = router.clone();
                        req.extensions_mut().insert(ConnectInfo(addr));
                        async move { router.oneshot(req).await }
                    });

                    if let Err(e) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {}", addr, e);
                    }
                }
                Err(e) => {
                    error!("TLS handshake failed from {}: {}", addr, e);
                }
            }
        });
    }
}

/// Status code for a terminal decision, `None` for [`Decision::Forward`]
pub fn status_for(decision: &Decision) -> Option<StatusCode> {
    match decision {
        Decision::BadRequest => Some(StatusCode::BAD_REQUEST),
        Decision::NoMatch => Some(StatusCode::NOT_FOUND),
        Decision::Forbidden => Some(StatusCode::UNAUTHORIZED),
        Decision::ServiceUnavailable => Some(StatusCode::BAD_GATEWAY),
        Decision::Forward(_) => None,
    }
}

fn reject(status: StatusCode) -> Response<Body> {
    let message = status.canonical_reason().unwrap_or("Error");
    (status, message).into_response()
}

/// Hostname the client asked for.
///
/// HTTP/2 carries it in the `:authority` pseudo-header instead of `Host`.
fn request_host(req: &Request<Body>) -> Option<String> {
    req.headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| req.uri().authority().map(|a| a.as_str()))
        .map(str::to_owned)
}

/// Main proxy handler - routes, then forwards or rejects
async fn proxy_handler(
    State(state): State<Arc<ProxyState>>,
    Extension(scheme): Extension<Scheme>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    mut req: Request<Body>,
) -> Response<Body> {
    let host = request_host(&req);
    let client: Option<IpAddr> = connect_info.map(|ConnectInfo(addr)| addr.ip());

    let decision = state.router.route(host.as_deref(), client, scheme);
    let host = host.as_deref().unwrap_or("-");

    let (endpoint, client) = match (decision, client) {
        (Decision::Forward(endpoint), Some(client)) => (endpoint, client),
        (decision, _) => {
            let status = status_for(&decision).unwrap_or(StatusCode::BAD_GATEWAY);
            info!(
                client = ?client,
                host,
                %scheme,
                status = status.as_u16(),
                "Request rejected"
            );
            return reject(status);
        }
    };

    info!(%client, host, %scheme, upstream = %endpoint, "Request forwarded");

    if !req.headers().contains_key(header::HOST) {
        if let Ok(value) = HeaderValue::from_str(host) {
            req.headers_mut().insert(header::HOST, value);
        }
    }

    match state.forwarder.forward(req, endpoint.clone(), client).await {
        Ok(response) => response,
        Err(e) => {
            error!(upstream = %endpoint, error = %e, "Backend error");
            reject(StatusCode::BAD_GATEWAY)
        }
    }
}
