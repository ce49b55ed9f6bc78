//! ksm-proxy: host-based reverse proxy for ksm managed servers
//!
//! Routes each request to the backend that owns its `Host`, after checking
//! the client address against the global and per-backend IP policies.

use clap::Parser;
use ksm_proxy::config::{self, ListenConfig};
use ksm_proxy::forward::HttpForwarder;
use ksm_proxy::logging::{self, LogFormat};
use ksm_proxy::tls::TlsManager;
use ksm_proxy::ProxyServer;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Host-based reverse proxy with per-backend IP access policy
#[derive(Parser, Debug)]
#[command(name = "ksm-proxy")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the global ksm configuration
    #[arg(long, env = "KSM_CONFIG")]
    config: PathBuf,

    /// Path to the ksm server list
    #[arg(long, env = "KSM_SERVERLIST")]
    serverlist: PathBuf,

    /// Plain HTTP port (0 disables)
    #[arg(long, env = "HTTP_PORT", default_value_t = 0)]
    http_port: u16,

    /// HTTPS port (0 disables)
    #[arg(long, env = "HTTPS_PORT", default_value_t = 0)]
    https_port: u16,

    /// Address the listeners bind to
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Backend connect timeout in seconds
    #[arg(long, env = "KSM_PROXY_CONNECT_TIMEOUT", default_value_t = 10)]
    connect_timeout: u64,

    /// Log output format
    #[arg(long, env = "KSM_PROXY_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logging::init(args.log_format);

    info!("Starting ksm-proxy v{}", env!("CARGO_PKG_VERSION"));
    info!(
        config = %args.config.display(),
        serverlist = %args.serverlist.display(),
        "Loading configuration"
    );

    let policy = match config::load_policy(&args.config, &args.serverlist) {
        Ok(policy) => Arc::new(policy),
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };

    let forwarder = Arc::new(HttpForwarder::new(Duration::from_secs(args.connect_timeout))?);
    let mut server = ProxyServer::new(policy.clone(), forwarder);

    if args.https_port != 0 {
        let tls = TlsManager::new(policy.global().cert.clone());
        if tls.certificates_available() {
            match tls.build_acceptor() {
                Ok(acceptor) => server = server.with_tls(acceptor),
                Err(e) => error!("Failed to set up TLS: {}", e),
            }
        } else {
            warn!("Public & private key don't exist or are not files");
        }
    }

    let listen = ListenConfig {
        bind_addr: args.bind,
        http_port: args.http_port,
        https_port: args.https_port,
    };

    if let Err(e) = server.run(&listen).await {
        error!("{}", e);
        return Err(e.into());
    }

    Ok(())
}
