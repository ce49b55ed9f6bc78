//! Configuration for ksm-proxy
//!
//! Reads the JSON files shared with the server manager: the global config
//! (`KSM_CONFIG`), the server list (`KSM_SERVERLIST`) and one descriptor per
//! backend. Files are deserialized into the serde models below and then
//! validated into the immutable [`PolicyModel`].
//!
//! # Example backend descriptor
//!
//! ```json
//! {
//!     "cwd": "/srv/shop",
//!     "command": ["node", "server.js"],
//!     "env": {},
//!     "ports": { "http": 8080, "https": 8443 },
//!     "proxy": {
//!         "enable": true,
//!         "domains": [
//!             { "domain": "shop.example.com", "regex": false, "regexFlags": "" },
//!             { "domain": "^.*\\.shop\\.example\\.com$", "regex": true, "regexFlags": "i" }
//!         ],
//!         "security": {
//!             "ip-blacklist": ["203.0.113.7"],
//!             "ip-whitelist": [],
//!             "block-by-default": false
//!         }
//!     }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{ProxyError, Result, ValidationErrors};
use crate::policy::{BackendConfig, CertPaths, DomainRule, GlobalProxyConfig, PolicyModel, SecurityPolicy};
use crate::security::parse_address;

/// Global configuration file
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtConfig {
    /// Environment shared with managed servers; not used by the proxy
    #[serde(default)]
    pub env: serde_json::Map<String, serde_json::Value>,
    pub proxy: ProxyConfig,
}

/// `proxy` section of the global configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    pub enable: bool,
    pub security: GlobalSecurityConfig,
}

/// `proxy.security` section of the global configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct GlobalSecurityConfig {
    pub cert: CertConfig,
    #[serde(default)]
    pub https_redirect: bool,
    #[serde(default)]
    pub ip_blacklist: Vec<String>,
}

/// Certificate paths; empty strings disable the secure listener
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CertConfig {
    #[serde(default)]
    pub public: String,
    #[serde(default)]
    pub private: String,
}

/// One entry of the server list
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerEntry {
    /// Process id maintained by the server manager, `-1` when stopped
    #[serde(default)]
    pub pid: i64,
    pub path: PathBuf,
}

/// Backend descriptor file
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtServerConfig {
    pub ports: PortsConfig,
    pub proxy: ServerProxyConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PortsConfig {
    pub http: u16,
    /// `0` when the backend has no TLS port
    pub https: u16,
}

/// `proxy` section of a backend descriptor
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerProxyConfig {
    pub enable: bool,
    pub domains: Vec<ServerDomain>,
    pub security: ServerSecurityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDomain {
    pub domain: String,
    pub regex: bool,
    pub regex_flags: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerSecurityConfig {
    pub ip_blacklist: Vec<String>,
    pub ip_whitelist: Vec<String>,
    pub block_by_default: bool,
}

/// Listener settings taken from the process environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenConfig {
    pub bind_addr: IpAddr,
    /// `0` disables the plain listener
    pub http_port: u16,
    /// `0` disables the secure listener
    pub https_port: u16,
}

/// Reads and deserializes a JSON file
fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ProxyError::Config(format!("Failed to read {}: {}", path.display(), e))
    })?;
    let value = serde_json::from_str(&content)?;
    Ok(value)
}

/// Parses every address in `list`, recording bad entries under `field.N`
fn parse_addresses(list: &[String], field: &str, errors: &mut ValidationErrors) -> Vec<IpAddr> {
    let mut parsed = Vec::with_capacity(list.len());
    for (i, text) in list.iter().enumerate() {
        match parse_address(text) {
            Some(addr) => parsed.push(addr),
            None => errors.push(format!("{}.{}", field, i), format!("invalid IP address '{}'", text)),
        }
    }
    parsed
}

impl ExtConfig {
    /// Load the global configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        read_json(path)
    }

    /// Validate into the global part of the policy model
    pub fn to_global(&self) -> Result<GlobalProxyConfig> {
        let security = &self.proxy.security;
        let mut errors = ValidationErrors::default();
        let blacklist = parse_addresses(&security.ip_blacklist, "proxy.security.ip-blacklist", &mut errors);
        let cert = CertPaths {
            public_key_path: PathBuf::from(&security.cert.public),
            private_key_path: PathBuf::from(&security.cert.private),
        };

        let global = GlobalProxyConfig::new(self.proxy.enable, security.https_redirect, blacklist, cert);
        Ok(errors.into_result(global)?)
    }
}

impl ExtServerConfig {
    /// Load a backend descriptor; the path must be a regular file
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(ProxyError::Config(format!(
                "{} does not exist or is not a file",
                path.display()
            )));
        }
        read_json(path)
    }

    /// Validate into a backend, collecting every field error.
    ///
    /// Regex domain rules are compiled here, once.
    pub fn to_backend(&self, name: &str) -> std::result::Result<BackendConfig, ValidationErrors> {
        let mut errors = ValidationErrors::default();

        let mut domains = Vec::with_capacity(self.proxy.domains.len());
        for (i, d) in self.proxy.domains.iter().enumerate() {
            if !d.regex {
                domains.push(DomainRule::literal(&d.domain));
                continue;
            }
            match DomainRule::regex(&d.domain, &d.regex_flags) {
                Ok(rule) => domains.push(rule),
                Err(e) => errors.push(format!("proxy.domains.{}.domain", i), e.to_string()),
            }
        }

        let security = &self.proxy.security;
        let blacklist = parse_addresses(&security.ip_blacklist, "proxy.security.ip-blacklist", &mut errors);
        let whitelist = parse_addresses(&security.ip_whitelist, "proxy.security.ip-whitelist", &mut errors);

        errors.into_result(BackendConfig {
            name: name.to_string(),
            domains,
            http_port: self.ports.http,
            https_port: self.ports.https,
            enabled: self.proxy.enable,
            security: SecurityPolicy::new(blacklist, whitelist, security.block_by_default),
        })
    }
}

/// Load the server list
pub fn load_serverlist(path: &Path) -> Result<Vec<ServerEntry>> {
    read_json(path)
}

/// Load one backend descriptor and validate it
pub fn load_backend(path: &Path) -> Result<BackendConfig> {
    let descriptor = ExtServerConfig::from_file(path)?;
    let backend = descriptor.to_backend(&path.display().to_string())?;
    Ok(backend)
}

/// Load every listed backend in order.
///
/// A descriptor that cannot be read, parsed or validated is skipped with a
/// warning. Disabled backends are skipped too.
pub fn load_backends(entries: &[ServerEntry]) -> Vec<BackendConfig> {
    let mut backends = Vec::with_capacity(entries.len());

    for entry in entries {
        match load_backend(&entry.path) {
            Ok(backend) if backend.enabled => backends.push(backend),
            Ok(_) => debug!(path = %entry.path.display(), "Backend proxy disabled, skipping"),
            Err(e) => warn!(path = %entry.path.display(), error = %e, "Excluding backend"),
        }
    }

    backends
}

/// Build the policy model from the global config and the server list
pub fn load_policy(config_path: &Path, serverlist_path: &Path) -> Result<PolicyModel> {
    let global = ExtConfig::from_file(config_path)?.to_global()?;
    if !global.enabled {
        return Err(ProxyError::ProxyDisabled);
    }

    let entries = load_serverlist(serverlist_path)?;
    let backends = load_backends(&entries);
    info!(
        listed = entries.len(),
        loaded = backends.len(),
        https_redirect = global.https_redirect,
        "Loaded backend configurations"
    );

    Ok(PolicyModel::new(global, backends))
}
