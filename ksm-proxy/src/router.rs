//! Request router for ksm-proxy
//!
//! Turns `(host, client address, scheme)` into a routing [`Decision`]
//! against an immutable [`PolicyModel`]. Routing performs no I/O and never
//! blocks, so a single `Router` is shared by every connection task.

use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

use crate::matcher;
use crate::policy::PolicyModel;
use crate::resolver::{self, Endpoint, Scheme};
use crate::security::{self, normalize_address};

/// Outcome of routing one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Host header or client address missing
    BadRequest,
    /// No backend claims the hostname
    NoMatch,
    /// Global blacklist hit, or the owning backend denies the address
    Forbidden,
    /// The owning backend's selected port is inactive
    ServiceUnavailable,
    /// Proxy to this target
    Forward(Endpoint),
}

/// Router for matching requests to backends
#[derive(Debug, Clone)]
pub struct Router {
    policy: Arc<PolicyModel>,
}

impl Router {
    /// Create a new router over a policy snapshot
    pub fn new(policy: Arc<PolicyModel>) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &PolicyModel {
        &self.policy
    }

    /// Decide what to do with a request.
    ///
    /// Only the first backend whose domain rules match is consulted. Its
    /// verdict is final even if a later backend would also match.
    pub fn route(&self, host: Option<&str>, client: Option<IpAddr>, scheme: Scheme) -> Decision {
        let (host, client) = match (host, client) {
            (Some(host), Some(client)) => (host, normalize_address(client)),
            _ => return Decision::BadRequest,
        };

        let global = self.policy.global();
        if security::is_globally_blocked(global, client) {
            debug!(%client, host, "Client is globally blacklisted");
            return Decision::Forbidden;
        }

        let Some(backend) = self
            .policy
            .backends()
            .iter()
            .find(|b| matcher::matches_any(host, &b.domains))
        else {
            return Decision::NoMatch;
        };

        if !security::is_allowed(backend, client) {
            debug!(%client, host, backend = %backend.name, "Backend denied client");
            return Decision::Forbidden;
        }

        match resolver::resolve(backend, scheme, global.https_redirect) {
            Some(endpoint) => {
                debug!(host, backend = %backend.name, upstream = %endpoint, "Matched backend");
                Decision::Forward(endpoint)
            }
            None => {
                debug!(host, backend = %backend.name, %scheme, "Backend port inactive");
                Decision::ServiceUnavailable
            }
        }
    }
}
