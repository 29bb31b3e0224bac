//! Edge gateway binary.
//!
//! ```text
//!     Client ──▶ http::server ──▶ routing ──▶ cache ──▶ load_balancer
//!                                                          │
//!                              circuit breaker + retries ◀─┘
//!                                         │
//!                                         ▼
//!                                  proxy::upstream ──▶ Backend
//!
//!     health (active probes + passive outcomes) writes backend liveness
//!     config watcher / SIGHUP ──▶ Gateway::reload
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use edge_gateway::clock::SystemClock;
use edge_gateway::config::{load_config, GatewayConfig};
use edge_gateway::observability::{init_logging, init_metrics};
use edge_gateway::proxy::{Gateway, HyperUpstream};
use edge_gateway::HttpServer;

#[derive(Parser)]
#[command(name = "edge-gateway", version, about = "HTTP reverse proxy and caching gateway")]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "edge-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        request_timeout_ms = config.timeouts.request_ms,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let upstream = HyperUpstream::new().with_max_response_bytes(config.listener.max_response_bytes);
    let gateway = Arc::new(Gateway::new(config, Arc::new(upstream), SystemClock::shared())?);

    let mut server = HttpServer::new(gateway);
    if let Some(path) = args.config {
        server = server.with_config_path(path);
    }
    server.run(listener).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
