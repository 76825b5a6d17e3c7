//! `cosid`: serves a COSI backend driver over QUIC.
//!
//! The backend and its policies come from `COSI_*` environment variables
//! (see [`libcosi::config`]); listen address, TLS material and log format
//! come from the command line.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use libcosi::{CallOptions, DriverConfig};
use libcosi::backend;
use libcosi::transport::CosiServer;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cosid", version, about = "COSI bucket provisioning driver")]
struct Cli {
    /// Address to accept QUIC connections on.
    #[arg(long, default_value = "0.0.0.0:7443")]
    listen: SocketAddr,

    /// PEM certificate chain presented to clients.
    #[arg(long)]
    cert: PathBuf,

    /// PEM private key matching `--cert`.
    #[arg(long)]
    key: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_tls(cert: &Path, key: &Path) -> Result<rustls::ServerConfig> {
    let certs = CertificateDer::pem_file_iter(cert)
        .with_context(|| format!("open certificate {}", cert.display()))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("parse certificate {}", cert.display()))?;
    let key = PrivateKeyDer::from_pem_file(key)
        .with_context(|| format!("load private key {}", key.display()))?;
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    rustls::ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .context("select TLS versions")?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("build TLS server config")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = DriverConfig::from_env().context("read driver configuration")?;
    info!(?config, "starting cosid");

    let driver = backend::from_config(&config)
        .await
        .context("initialise driver")?;
    let tls = load_tls(&cli.cert, &cli.key)?;
    let server = CosiServer::new(cli.listen, tls, driver)
        .context("bind QUIC endpoint")?
        .with_options(CallOptions::from(&config));

    tokio::select! {
        res = server.serve() => res.context("serve")?,
        res = tokio::signal::ctrl_c() => {
            res.context("install signal handler")?;
            info!("shutdown requested");
            server
                .endpoint()
                .close(quinn::VarInt::from_u32(0), b"server shutdown");
        }
    }

    server.endpoint().wait_idle().await;
    info!("cosid stopped");
    Ok(())
}
