//! # outrelay
//!
//! Relay binary: serves `/line`, `/close` and `/keepalive` and forwards each
//! session's lines to the collector as one streaming `POST`.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use outrelay_conn::{ConnManager, HttpTransport};
use outrelay_core::logging;
use outrelay_server::{RelayServer, ServerConfig};
use outrelay_settings::{CollectorSettings, RelaySettings};

/// Time allowed for session streams to finish after they are closed.
const STREAM_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Relays numbered lines to a streaming HTTP collector.
#[derive(Parser, Debug)]
#[command(name = "outrelay", version, about)]
struct Cli {
    /// Settings file (default `~/.outrelay/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Collector base URL; each session posts to `<url>/<id>`.
    #[arg(long)]
    collector: Option<String>,

    /// Accept invalid collector TLS certificates.
    #[arg(long)]
    insecure: bool,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

impl Cli {
    /// Load settings and apply flags over them.
    fn settings(&self) -> Result<RelaySettings> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(outrelay_settings::settings_path);
        let mut settings = outrelay_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        self.apply(&mut settings);
        settings.validate().context("Invalid settings")?;
        Ok(settings)
    }

    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(ref host) = self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(ref url) = self.collector {
            settings.collector.base_url.clone_from(url);
        }
        if self.insecure {
            settings.collector.accept_invalid_certs = true;
        }
    }
}

/// HTTP client for collector streams.
///
/// No overall request timeout: a session's request lives as long as the
/// session.
fn collector_client(collector: &CollectorSettings) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .use_rustls_tls()
        .danger_accept_invalid_certs(collector.accept_invalid_certs)
        .connect_timeout(collector.connect_timeout())
        .build()
        .context("Failed to build collector HTTP client")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.settings()?;

    logging::init_subscriber(logging::level_for(args.debug, &settings.log_level));

    if settings.collector.accept_invalid_certs {
        tracing::warn!("collector TLS certificate verification disabled");
    }
    let client = collector_client(&settings.collector)?;
    let transport = HttpTransport::new(&settings.collector.base_url, client);
    let manager = ConnManager::with_keepalive(transport, settings.keepalive_window());

    let config = ServerConfig::new(settings.server.host.clone(), settings.server.port);
    let server = RelayServer::new(config, Arc::new(manager.clone()));
    let handle = server.listen().await.context("Failed to bind server")?;

    tracing::info!(
        addr = %handle.addr(),
        collector = %settings.collector.base_url,
        keepalive_secs = settings.keepalive_secs,
        "outrelay listening"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let closed = manager.close_all();
    tracing::info!(closed, "closed open connections");
    let _ = server.shutdown().drain(vec![handle.into_task()]).await;
    if !manager.drain(STREAM_DRAIN_TIMEOUT).await {
        tracing::warn!("some collector streams did not finish");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
