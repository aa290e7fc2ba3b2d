//! stream-proxy
//!
//! A worker-pooled HTTP media streaming proxy built with Tokio, Hyper and Axum.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────┐
//!                      │                     STREAM PROXY                      │
//!                      │                                                       │
//!   Client request     │  ┌──────────┐   ┌─────────────┐   ┌───────────────┐   │
//!   ───────────────────┼─▶│ acceptor │──▶│ worker pool │──▶│  dispatcher   │   │
//!                      │  │ deadline │   │ select+count│   │ client resolve│   │
//!                      │  └──────────┘   └──────┬──────┘   └───────┬───────┘   │
//!                      │                        │                  ▼           │
//!                      │                 ┌──────┴──────┐   ┌───────────────┐   │
//!                      │                 │  recycler   │   │ proxy handler │◀──┼──── Origin
//!   Client response    │                 │drain/replace│   │ bounded relay │───┼───▶
//!   ◀──────────────────┼─────────────────┴─────────────┴───┴───────────────┘   │
//!                      └──────────────────────────────────────────────────────┘
//! ```

use clap::Parser;

use stream_proxy::config::cli::Cli;
use stream_proxy::lifecycle::{signals, Shutdown};
use stream_proxy::observability::{logging, metrics};
use stream_proxy::{Acceptor, HttpServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = cli.load()?;

    logging::init_logging(&config.observability)?;
    tracing::info!("stream-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address(),
        workers = config.workers.count,
        max_requests = config.workers.max_requests,
        max_requests_jitter = config.workers.max_requests_jitter,
        request_timeout_secs = config.timeouts.request_secs,
        forwarded_allow_ips = ?config.forwarding.allow_ips,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr: std::net::SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let acceptor = Acceptor::bind(
        &config.listener,
        std::time::Duration::from_secs(config.timeouts.request_secs),
    )
    .await?;

    let shutdown = Shutdown::new();
    let server = HttpServer::new(&config)?;
    let receiver = shutdown.subscribe();
    signals::install(shutdown);

    server.run(acceptor, receiver).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
