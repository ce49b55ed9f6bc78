//! Error types for ksm-proxy

use std::fmt;
use thiserror::Error;

/// Result type alias for proxy operations
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Proxy error types
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Descriptor failed validation
    #[error("Invalid configuration: {0}")]
    Validation(#[from] ValidationErrors),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(String),

    /// Global proxy switch is off
    #[error("Proxy is not enabled")]
    ProxyDisabled,

    /// Neither the plain nor the secure listener could be started
    #[error("No server active or able to be active")]
    NoListener,
}

/// A single problem found while validating a configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Dotted path of the offending field, e.g. `proxy.domains.0.domain`
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Every field error collected from one configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(FieldError::new(field, message));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }

    /// `Ok(value)` when nothing was collected, otherwise the whole list.
    pub fn into_result<T>(self, value: T) -> std::result::Result<T, ValidationErrors> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Failure reported by the forwarding engine
#[derive(Error, Debug)]
pub enum ForwardError {
    /// Backend could not be reached or the exchange broke off
    #[error("Backend connection error: {0}")]
    BackendConnection(String),

    /// Request could not be turned into an upstream request
    #[error("HTTP error: {0}")]
    Http(String),
}
