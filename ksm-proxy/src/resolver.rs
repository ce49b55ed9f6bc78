//! Target resolution
//!
//! Picks the backend port a request is forwarded to. Backends always run
//! next to the proxy, so the host part of a target is fixed to `localhost`.

use std::fmt;

use crate::policy::BackendConfig;

/// Host every backend is reached on
pub const BACKEND_HOST: &str = "localhost";

/// Scheme of an inbound connection, or of the upstream leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Plain,
    Secure,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Plain => "http",
            Scheme::Secure => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concrete forwarding target
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Scheme spoken to the backend
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn local(scheme: Scheme, port: u16) -> Self {
        Self {
            scheme,
            host: BACKEND_HOST.to_string(),
            port,
        }
    }

    /// Base URL of the target, e.g. `http://localhost:8080`
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    /// Full upstream URL for a request path (with query)
    pub fn url_for(&self, path_and_query: &str) -> String {
        if path_and_query.starts_with('/') {
            format!("{}{}", self.base_url(), path_and_query)
        } else {
            format!("{}/{}", self.base_url(), path_and_query)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Port for `backend` given the inbound `scheme`.
///
/// With `force_https` the TLS port is used for every request. `0` means the
/// chosen port is inactive.
pub fn resolve_port(backend: &BackendConfig, scheme: Scheme, force_https: bool) -> u16 {
    if force_https {
        return backend.https_port;
    }
    match scheme {
        Scheme::Secure => backend.https_port,
        Scheme::Plain => backend.http_port,
    }
}

/// Full target for `backend`, or `None` when the chosen port is inactive.
///
/// Under `force_https` the backend's TLS port is addressed over plain http;
/// otherwise the upstream leg keeps the inbound scheme.
pub fn resolve(backend: &BackendConfig, scheme: Scheme, force_https: bool) -> Option<Endpoint> {
    let port = resolve_port(backend, scheme, force_https);
    if port == 0 {
        return None;
    }
    let upstream = if force_https { Scheme::Plain } else { scheme };
    Some(Endpoint::local(upstream, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{DomainRule, SecurityPolicy};

    fn backend(http_port: u16, https_port: u16) -> BackendConfig {
        BackendConfig {
            name: "test".to_string(),
            domains: vec![DomainRule::literal("example.com")],
            http_port,
            https_port,
            enabled: true,
            security: SecurityPolicy::default(),
        }
    }

    #[test]
    fn test_scheme_selects_port() {
        let b = backend(8080, 8443);
        assert_eq!(resolve_port(&b, Scheme::Plain, false), 8080);
        assert_eq!(resolve_port(&b, Scheme::Secure, false), 8443);
    }

    #[test]
    fn test_force_https_always_tls_port() {
        let b = backend(8080, 8443);
        assert_eq!(resolve_port(&b, Scheme::Plain, true), 8443);
        assert_eq!(resolve_port(&b, Scheme::Secure, true), 8443);
    }

    #[test]
    fn test_inactive_port() {
        let b = backend(8080, 0);
        assert_eq!(resolve(&b, Scheme::Plain, true), None);
        assert_eq!(resolve(&b, Scheme::Secure, false), None);
        assert!(resolve(&b, Scheme::Plain, false).is_some());
    }

    #[test]
    fn test_upstream_scheme() {
        let b = backend(8080, 8443);
        let secure = resolve(&b, Scheme::Secure, false).unwrap();
        assert_eq!(secure.base_url(), "https://localhost:8443");

        let forced = resolve(&b, Scheme::Plain, true).unwrap();
        assert_eq!(forced.base_url(), "http://localhost:8443");
        assert_eq!(forced.to_string(), "localhost:8443");
    }

    #[test]
    fn test_url_for() {
        let e = Endpoint::local(Scheme::Plain, 3000);
        assert_eq!(e.url_for("/api/users?page=2"), "http://localhost:3000/api/users?page=2");
        assert_eq!(e.url_for("*"), "http://localhost:3000/*");
    }
}
