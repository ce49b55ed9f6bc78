//! ksm-proxy: host-based reverse proxy with IP access policy
//!
//! Sits in front of the application servers managed by ksm. Each backend
//! describes the domains it serves, its plain and TLS ports, and who may
//! reach it. For every request the proxy picks the first backend whose
//! domain rules match the `Host` header, checks the client address, and
//! forwards to `localhost` on the selected port.
//!
//! # Request flow
//!
//! 1. Missing `Host` or client address: 400
//! 2. Client on the global blacklist: 401
//! 3. No backend claims the host: 404
//! 4. Backend policy denies the client: 401
//! 5. Selected port is `0`: 502
//! 6. Otherwise forward; a failed forward is a 502
//!
//! # Example
//!
//! ```ignore
//! use ksm_proxy::config::load_policy;
//! use ksm_proxy::resolver::Scheme;
//! use ksm_proxy::router::Router;
//! use std::sync::Arc;
//!
//! let policy = Arc::new(load_policy("config.json".as_ref(), "serverlist.json".as_ref())?);
//! let router = Router::new(policy);
//! let decision = router.route(Some("api.example.com"), Some("10.0.0.1".parse()?), Scheme::Plain);
//! ```

pub mod config;
pub mod error;
pub mod forward;
pub mod logging;
pub mod matcher;
pub mod policy;
pub mod proxy;
pub mod resolver;
pub mod router;
pub mod security;
pub mod tls;

pub use error::{ProxyError, Result};
pub use policy::PolicyModel;
pub use proxy::ProxyServer;
pub use router::Decision;
