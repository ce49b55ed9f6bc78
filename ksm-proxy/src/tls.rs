//! TLS configuration for the secure listener
//!
//! Certificates are loaded once at startup from the paths in the global
//! configuration. There is no renewal or reload.

use rustls::ServerConfig;
use rustls_pemfile::{certs, pkcs8_private_keys, rsa_private_keys};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::info;

use crate::error::{ProxyError, Result};
use crate::policy::CertPaths;

/// TLS manager for handling certificates
pub struct TlsManager {
    paths: CertPaths,
}

impl TlsManager {
    /// Create a new TLS manager
    pub fn new(paths: CertPaths) -> Self {
        Self { paths }
    }

    /// Both the certificate and the key are configured and are regular files
    pub fn certificates_available(&self) -> bool {
        is_regular_file(&self.paths.public_key_path) && is_regular_file(&self.paths.private_key_path)
    }

    /// Build a TLS acceptor from the configured files
    pub fn build_acceptor(&self) -> Result<TlsAcceptor> {
        if !self.certificates_available() {
            return Err(ProxyError::Tls(
                "Public & private key don't exist or are not files".to_string(),
            ));
        }
        let server_config = self.load_static_certs(&self.paths.public_key_path, &self.paths.private_key_path)?;
        Ok(TlsAcceptor::from(Arc::new(server_config)))
    }

    /// Load certificates from files
    fn load_static_certs(&self, cert_path: &Path, key_path: &Path) -> Result<ServerConfig> {
        info!("Loading TLS certificate from {} and {}", cert_path.display(), key_path.display());

        let cert_file = File::open(cert_path).map_err(|e| {
            ProxyError::Tls(format!("Failed to open certificate file: {}", e))
        })?;
        let mut cert_reader = BufReader::new(cert_file);
        let certs_der = certs(&mut cert_reader)
            .map_err(|e| ProxyError::Tls(format!("Failed to read certificates: {}", e)))?;

        if certs_der.is_empty() {
            return Err(ProxyError::Tls("No certificates found in file".to_string()));
        }

        let key = load_private_key(key_path)?;

        let certs: Vec<rustls::Certificate> = certs_der.into_iter().map(rustls::Certificate).collect();

        ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| ProxyError::Tls(format!("TLS config error: {}", e)))
    }
}

fn is_regular_file(path: &Path) -> bool {
    !path.as_os_str().is_empty() && path.is_file()
}

/// PKCS8 first, then RSA
fn load_private_key(key_path: &Path) -> Result<rustls::PrivateKey> {
    let open = || {
        File::open(key_path)
            .map(BufReader::new)
            .map_err(|e| ProxyError::Tls(format!("Failed to open key file: {}", e)))
    };

    let keys = pkcs8_private_keys(&mut open()?)
        .map_err(|e| ProxyError::Tls(format!("Failed to read PKCS8 keys: {}", e)))?;
    if let Some(key) = keys.into_iter().next() {
        return Ok(rustls::PrivateKey(key));
    }

    let rsa_keys = rsa_private_keys(&mut open()?)
        .map_err(|e| ProxyError::Tls(format!("Failed to read RSA keys: {}", e)))?;
    rsa_keys
        .into_iter()
        .next()
        .map(rustls::PrivateKey)
        .ok_or_else(|| ProxyError::Tls("No private key found in file".to_string()))
}
