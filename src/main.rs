//! Version-routing reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────┐
//!                      │                  VERSION PROXY                        │
//!                      │                                                       │
//!   Client Request     │  ┌──────────┐   ┌──────────┐   ┌──────────────────┐  │
//!   ───────────────────┼─▶│   net    │──▶│   http   │──▶│ routing::Version │  │
//!                      │  │ listener │   │dispatcher│   │      Router      │  │
//!                      │  └──────────┘   └──────────┘   └────────┬─────────┘  │
//!                      │                                          │            │
//!                      │                          Version header  ▼            │
//!                      │  ┌──────────┐   ┌──────────┐   ┌──────────────────┐  │
//!   watch folder ──────┼─▶│  deploy  │──▶│versioning│──▶│ hosting::SiteHost│──┼──▶ instance
//!   POST /upload ──────┼─▶│ scanner  │   │  table   │   │  (health gated)  │  │
//!                      │  └──────────┘   └──────────┘   └──────────────────┘  │
//!                      │                                                       │
//!                      │  config · security · observability · lifecycle        │
//!                      └──────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use version_proxy::config::{load_config, validate_config, EndpointConfig};
use version_proxy::hosting::ProcessLauncher;
use version_proxy::http::{build_app, Dispatcher};
use version_proxy::lifecycle::{listen_for_signals, parent_watchdog, security_from_config, Services, Shutdown};
use version_proxy::observability::{init_logging, metrics, LogTail};

/// Endpoint name used for `--port`.
const LOCAL_ENDPOINT: &str = "local";

#[derive(Parser)]
#[command(name = "version-proxy")]
#[command(about = "Routes requests to side-by-side API versions and hot-deploys new builds", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Also listen for plain http on 127.0.0.1:<PORT>.
    #[arg(short, long)]
    port: Option<u16>,

    /// Exit once this process is gone.
    #[arg(long)]
    parent_pid: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.listener.endpoints.retain(|e| e.name != LOCAL_ENDPOINT);
        config
            .listener
            .endpoints
            .push(EndpointConfig::http(LOCAL_ENDPOINT, format!("127.0.0.1:{}", port)));
        if let Err(errors) = validate_config(&config) {
            for error in &errors {
                eprintln!("invalid configuration: {}", error);
            }
            return Err(format!("{} configuration error(s)", errors.len()).into());
        }
    }

    let log_tail = LogTail::new(config.observability.log_tail_bytes);
    init_logging(&config.observability.log_level, log_tail.clone());

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "version-proxy starting");
    tracing::info!(
        endpoints = config.listener.endpoints.len(),
        parallelism = config.listener.parallelism,
        watch_folder = %config.deployment.watch_folder.display(),
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    tokio::spawn(listen_for_signals(shutdown.clone()));

    let launcher = Arc::new(ProcessLauncher::new(config.timeouts.launch()));
    let security = security_from_config(&config.security);
    let services = Services::build(&config, launcher, security, log_tail, &shutdown)?;

    let on_tick = Arc::new(parent_watchdog(cli.parent_pid, shutdown.clone()));
    let dispatcher = match Dispatcher::bind(&config.listener, build_app(Arc::clone(&services.router)), on_tick).await {
        Ok(dispatcher) => dispatcher,
        Err(e) => {
            tracing::error!(error = %e, "Cannot listen on any endpoint");
            shutdown.trigger();
            services.stop(config.timeouts.drain()).await;
            return Err(e.into());
        }
    };
    for (name, addr) in dispatcher.local_addrs() {
        tracing::info!(endpoint = %name, address = %addr, "Listening for connections");
    }

    services.serve(dispatcher, shutdown, config.timeouts.drain()).await;

    tracing::info!("Shutdown complete");
    Ok(())
}
