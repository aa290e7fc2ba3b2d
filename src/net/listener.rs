//! TCP acceptor.
//!
//! # Responsibilities
//! - Bind to the configured `(host, port)`
//! - Accept incoming TCP connections and stamp their request deadline
//! - Graceful handling of accept errors
//!
//! Backpressure comes from the worker pool: the accept loop does not accept
//! the next connection until the previous one has a worker.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;

use crate::config::ListenerConfig;
use crate::error::ProxyError;
use crate::net::connection::Connection;

/// Accepts client connections and applies the request timeout.
#[derive(Debug)]
pub struct Acceptor {
    /// The underlying TCP listener.
    inner: TcpListener,
    /// Overall timeout, accept to final byte.
    request_timeout: Duration,
}

impl Acceptor {
    /// Bind to the configured address.
    pub async fn bind(config: &ListenerConfig, request_timeout: Duration) -> Result<Self, ProxyError> {
        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(|source| ProxyError::Bind {
                address: config.bind_address(),
                source,
            })?;

        Self::from_listener(listener, request_timeout)
    }

    /// Wrap an already bound listener.
    pub fn from_listener(listener: TcpListener, request_timeout: Duration) -> Result<Self, ProxyError> {
        let local_addr = listener.local_addr().map_err(|source| ProxyError::Bind {
            address: "<bound listener>".to_string(),
            source,
        })?;

        tracing::info!(
            address = %local_addr,
            request_timeout_secs = request_timeout.as_secs(),
            "Listener bound"
        );

        Ok(Self {
            inner: listener,
            request_timeout,
        })
    }

    /// Accept a new connection.
    pub async fn accept(&self) -> std::io::Result<Connection> {
        let (stream, peer) = self.inner.accept().await?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer_addr = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        let connection = Connection::new(stream, peer, self.request_timeout);
        tracing::debug!(
            connection_id = %connection.id,
            peer_addr = %peer,
            "Connection accepted"
        );
        Ok(connection)
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }
}

/// Accept errors that only affect the one connection being accepted.
pub fn is_transient_accept_error(error: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        error.kind(),
        ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset | ErrorKind::Interrupted | ErrorKind::WouldBlock
    )
}
