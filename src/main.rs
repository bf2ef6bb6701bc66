//! Server panel binary.
//!
//! ```text
//!     Browser ──▶ listener ──▶ Dispatcher
//!                               │ recovery
//!                               │ logger → cors → rate limit
//!                               ▼
//!                           route trie ──▶ public handlers (login, static)
//!                               │
//!                               └─▶ auth gate ──▶ protected handlers
//!                                       │
//!                          SessionStore ┴ AuthManager
//!                          (SQLite)       (/etc/passwd, su)
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use server_panel::config::{load_config, validate_config, ConfigError, PanelConfig};
use server_panel::http::{AppState, PanelServer};
use server_panel::lifecycle::{signals, Shutdown};
use server_panel::observability::{logging, metrics};

/// How long in-flight requests (and open event streams) get after a signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(name = "server-panel", version, about = "Web control panel for a single Linux host")]
struct Cli {
    /// TOML configuration file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind, overrides the configured host
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, overrides the configured port
    #[arg(short, long)]
    port: Option<u16>,

    /// Verbose logging
    #[arg(short, long)]
    debug: bool,
}

impl Cli {
    fn resolve_config(&self) -> Result<PanelConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => PanelConfig::default(),
        };

        if self.host.is_some() || self.port.is_some() {
            let (default_host, default_port) = config
                .listener
                .bind_address
                .rsplit_once(':')
                .map(|(h, p)| (h.to_string(), p.parse().unwrap_or(8080)))
                .unwrap_or_else(|| ("0.0.0.0".to_string(), 8080));
            let host = self.host.clone().unwrap_or(default_host);
            let port = self.port.unwrap_or(default_port);
            config.listener.bind_address = format!("{host}:{port}");
        }
        config.debug |= self.debug;

        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = match cli.resolve_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(2);
        }
    };

    logging::init(&config.observability, config.debug);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "server-panel starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        database = %config.session.database_path,
        rate_limit = config.rate_limit.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let state = AppState::from_config(config)?;
    let server = PanelServer::new(state)?;

    let shutdown = std::sync::Arc::new(Shutdown::new());
    let mut serving = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { server.run(listener, &shutdown).await })
    };

    tokio::select! {
        _ = signals::wait_for_signal() => {}
        finished = &mut serving => {
            // The server stopped on its own; nothing left to drain.
            finished??;
            return Ok(());
        }
    }
    shutdown.trigger();

    match tokio::time::timeout(DRAIN_TIMEOUT, serving).await {
        Ok(Ok(result)) => result?,
        Ok(Err(e)) => tracing::error!(error = %e, "Server task failed"),
        Err(_) => tracing::warn!(timeout = ?DRAIN_TIMEOUT, "Drain timed out, exiting"),
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
