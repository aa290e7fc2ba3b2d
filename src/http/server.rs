//! HTTP server setup.
//!
//! # Responsibilities
//! - Build the worker pool with a dispatcher factory
//! - Run the accept loop, handing each connection to the pool
//! - On shutdown: stop accepting, drain every worker, return

use std::sync::Arc;
use std::time::Duration;

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::http::dispatcher::DispatcherFactory;
use crate::lifecycle::ShutdownSignal;
use crate::net::listener::{is_transient_accept_error, Acceptor};
use crate::pool::{PoolSettings, WorkerPool};

/// Pause after an accept error that is not specific to one connection
/// (e.g. out of file descriptors).
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// HTTP server for the streaming proxy.
pub struct HttpServer {
    pool: Arc<WorkerPool>,
}

impl HttpServer {
    /// Create the server and start its workers. Must run inside a Tokio runtime.
    pub fn new(config: &ProxyConfig) -> Result<Self, ProxyError> {
        let factory = DispatcherFactory::from_config(config)?;
        let pool = WorkerPool::start(PoolSettings::from_config(config), Arc::new(factory));
        Ok(Self { pool })
    }

    pub fn pool(&self) -> Arc<WorkerPool> {
        Arc::clone(&self.pool)
    }

    /// Accept until `shutdown` fires, then drain the pool.
    pub async fn run(self, acceptor: Acceptor, mut shutdown: ShutdownSignal) -> Result<(), ProxyError> {
        if let Ok(addr) = acceptor.local_addr() {
            tracing::info!(address = %addr, workers = self.pool.size(), "HTTP server starting");
        }

        let reason = loop {
            let conn = tokio::select! {
                reason = shutdown.stopped() => break Some(reason),
                accepted = acceptor.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) if is_transient_accept_error(&e) => {
                        tracing::debug!(error = %e, "Accept failed");
                        continue;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                        continue;
                    }
                },
            };

            // Backpressure: no further accepts until this connection has a worker.
            tokio::select! {
                assigned = self.pool.dispatch(conn) => {
                    if assigned.is_err() {
                        break None;
                    }
                }
                reason = shutdown.stopped() => break Some(reason),
            }
        };

        drop(acceptor);
        match reason {
            Some(reason) => tracing::info!(%reason, "Stopped accepting, draining workers"),
            None => tracing::warn!("Worker pool closed, draining workers"),
        }
        self.pool.close();
        self.pool.wait_retired().await;
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
