//! Policy model
//!
//! The immutable, in-memory view of the global proxy settings and the
//! ordered backend list. Built once at startup by [`crate::config`] and
//! shared read-only between connection tasks.

use regex::Regex;
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::PathBuf;

use crate::matcher::{self, RuleError};
use crate::security::normalize_address;

/// A literal or regex pattern deciding whether a hostname belongs to a backend.
#[derive(Debug, Clone)]
pub struct DomainRule {
    pattern: String,
    flags: String,
    compiled: Option<Regex>,
}

impl DomainRule {
    /// Exact, case-sensitive hostname rule
    pub fn literal(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            flags: String::new(),
            compiled: None,
        }
    }

    /// Regex rule, compiled immediately with JavaScript-style `flags`
    pub fn regex(pattern: impl Into<String>, flags: impl Into<String>) -> Result<Self, RuleError> {
        let pattern = pattern.into();
        let flags = flags.into();
        let compiled = matcher::compile(&pattern, &flags)?;
        Ok(Self {
            pattern,
            flags,
            compiled: Some(compiled),
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn flags(&self) -> &str {
        &self.flags
    }

    pub fn is_regex(&self) -> bool {
        self.compiled.is_some()
    }

    pub(crate) fn compiled(&self) -> Option<&Regex> {
        self.compiled.as_ref()
    }
}

/// Per-backend address policy
#[derive(Debug, Clone, Default)]
pub struct SecurityPolicy {
    blacklist: HashSet<IpAddr>,
    whitelist: HashSet<IpAddr>,
    block_by_default: bool,
}

impl SecurityPolicy {
    /// Builds a policy, normalizing every address to its canonical form.
    pub fn new(
        blacklist: impl IntoIterator<Item = IpAddr>,
        whitelist: impl IntoIterator<Item = IpAddr>,
        block_by_default: bool,
    ) -> Self {
        Self {
            blacklist: blacklist.into_iter().map(normalize_address).collect(),
            whitelist: whitelist.into_iter().map(normalize_address).collect(),
            block_by_default,
        }
    }

    pub fn blacklist(&self) -> &HashSet<IpAddr> {
        &self.blacklist
    }

    pub fn whitelist(&self) -> &HashSet<IpAddr> {
        &self.whitelist
    }

    /// Only whitelisted addresses are admitted; the blacklist is ignored
    pub fn block_by_default(&self) -> bool {
        self.block_by_default
    }
}

/// One backend application server fronted by the proxy
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Where the backend was loaded from; used for logging only
    pub name: String,
    pub domains: Vec<DomainRule>,
    pub http_port: u16,
    /// `0` means the TLS port is inactive
    pub https_port: u16,
    pub enabled: bool,
    pub security: SecurityPolicy,
}

/// Certificate locations for the secure listener
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertPaths {
    pub public_key_path: PathBuf,
    pub private_key_path: PathBuf,
}

/// Settings that apply to every backend
#[derive(Debug, Clone, Default)]
pub struct GlobalProxyConfig {
    pub enabled: bool,
    /// Send every request to the backend's TLS port regardless of inbound scheme
    pub https_redirect: bool,
    global_blacklist: HashSet<IpAddr>,
    pub cert: CertPaths,
}

impl GlobalProxyConfig {
    pub fn new(
        enabled: bool,
        https_redirect: bool,
        global_blacklist: impl IntoIterator<Item = IpAddr>,
        cert: CertPaths,
    ) -> Self {
        Self {
            enabled,
            https_redirect,
            global_blacklist: global_blacklist.into_iter().map(normalize_address).collect(),
            cert,
        }
    }

    /// Addresses refused before any backend is considered, normalized
    pub fn global_blacklist(&self) -> &HashSet<IpAddr> {
        &self.global_blacklist
    }
}

/// Global settings plus the ordered list of routable backends.
///
/// Backend order is the conflict-resolution rule for overlapping domains:
/// the first backend whose rules match a hostname owns it.
#[derive(Debug, Clone)]
pub struct PolicyModel {
    global: GlobalProxyConfig,
    backends: Vec<BackendConfig>,
}

impl PolicyModel {
    /// Builds the model, keeping only enabled backends in their given order.
    pub fn new(global: GlobalProxyConfig, backends: Vec<BackendConfig>) -> Self {
        let backends = backends.into_iter().filter(|b| b.enabled).collect();
        Self { global, backends }
    }

    pub fn global(&self) -> &GlobalProxyConfig {
        &self.global
    }

    pub fn backends(&self) -> &[BackendConfig] {
        &self.backends
    }
}
