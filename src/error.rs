//! Error taxonomy for the proxy.
//!
//! Every per-connection error is contained to its connection. Only `Bind`
//! and `Config` are fatal, and only at startup.

use std::net::IpAddr;
use std::time::Duration;

use crate::config::loader::ConfigError;
use crate::pool::WorkerId;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The listening socket could not be bound.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The client connection outlived the request timeout.
    #[error("connection exceeded the {0:?} request timeout")]
    ClientTimeout(Duration),

    /// The origin could not be reached before any response started.
    #[error("upstream {origin} unavailable: {reason}")]
    UpstreamConnect { origin: String, reason: String },

    /// The origin answered, but not with a success status, where the proxy
    /// needs the body itself (manifests, segments).
    #[error("upstream {origin} answered {status}")]
    UpstreamStatus { origin: String, status: u16 },

    /// The origin's MPD could not be read or understood.
    #[error("invalid manifest from {origin}: {reason}")]
    InvalidManifest { origin: String, reason: String },

    /// The requested profile is not in the manifest.
    #[error("profile {0:?} not found")]
    ProfileNotFound(String),

    /// The origin failed after the response had started streaming.
    #[error("upstream stream from {origin} failed: {reason}")]
    UpstreamStream { origin: String, reason: String },

    /// A forwarding header arrived from a peer outside the allow-list.
    #[error("ignored forwarding header from untrusted peer {peer}")]
    ForgedForwardingHeader { peer: IpAddr },

    /// A draining worker hit its deadline with connections still open.
    #[error("worker {worker} still had {lingering} connection(s) at its drain deadline")]
    WorkerDrainTimeout { worker: WorkerId, lingering: usize },

    /// The requested origin URL is missing or unusable.
    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    /// The TLS client for HTTPS origins could not be set up.
    #[error("TLS client setup failed: {0}")]
    Tls(#[from] rustls::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ProxyError {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::Bind { .. } => "bind",
            ProxyError::ClientTimeout(_) => "client_timeout",
            ProxyError::UpstreamConnect { .. } => "upstream_connect",
            ProxyError::UpstreamStatus { .. } => "upstream_status",
            ProxyError::InvalidManifest { .. } => "invalid_manifest",
            ProxyError::ProfileNotFound(_) => "profile_not_found",
            ProxyError::UpstreamStream { .. } => "upstream_stream",
            ProxyError::ForgedForwardingHeader { .. } => "forged_forwarding_header",
            ProxyError::WorkerDrainTimeout { .. } => "worker_drain_timeout",
            ProxyError::InvalidDestination(_) => "invalid_destination",
            ProxyError::Tls(_) => "tls",
            ProxyError::Config(_) => "config",
        }
    }
}
