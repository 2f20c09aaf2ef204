//! edge-balancer
//!
//! A layer-4 load balancer built with Tokio.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌────────────────────────────────────────────────────────┐
//!                         │                     EDGE BALANCER                       │
//!                         │                                                         │
//!     Client connection   │  ┌──────────┐    ┌──────────┐    ┌───────────────┐      │
//!     ────────────────────┼─▶│   net    │───▶│  tls     │───▶│    proxy      │      │
//!                         │  │ listener │    │(optional)│    │   session     │      │
//!                         │  └──────────┘    └──────────┘    └───────┬───────┘      │
//!                         │                                          │              │
//!                         │                                          ▼              │
//!                         │                                  ┌───────────────┐      │
//!                         │                                  │ load_balancer │      │
//!                         │                                  │ least conns   │      │
//!                         │                                  └───────┬───────┘      │
//!                         │                                          │              │
//!                         │                                          ▼              │
//!     Relayed bytes       │                                  ┌───────────────┐      │
//!     ◀───────────────────┼──────────────────────────────────│    relay      │◀─────┼──── Backend
//!                         │                                  └───────────────┘      │
//!                         │                                                         │
//!                         │  ┌───────────────────────────────────────────────────┐  │
//!                         │  │              Cross-Cutting Concerns                │  │
//!                         │  │  ┌────────┐ ┌────────┐ ┌──────────┐ ┌───────────┐ │  │
//!                         │  │  │ config │ │ health │ │observa-  │ │ lifecycle │ │  │
//!                         │  │  │        │ │monitor │ │ bility   │ │ + admin   │ │  │
//!                         │  │  └────────┘ └────────┘ └──────────┘ └───────────┘ │  │
//!                         │  └───────────────────────────────────────────────────┘  │
//!                         └────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use edge_balancer::config::{load_config, ProxyConfig};
use edge_balancer::lifecycle::signals;
use edge_balancer::observability::{logging, metrics};
use edge_balancer::{ProxyServer, Shutdown};

#[derive(Parser)]
#[command(name = "edge-balancer")]
#[command(about = "Least-connections TCP load balancer with TLS termination", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "edge-balancer starting");

    tracing::info!(
        plain_address = ?config.listener.plain_address,
        tls_address = ?config.listener.tls_address,
        backends = config.backends.len(),
        policy = ?config.load_balancing.policy,
        max_connections = config.listener.max_connections,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = match ProxyServer::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return Err(e.into());
        }
    };

    let shutdown = Shutdown::new();
    tokio::spawn(signals::watch(shutdown.clone()));

    server.run(shutdown).await;

    tracing::info!("Shutdown complete");
    Ok(())
}
