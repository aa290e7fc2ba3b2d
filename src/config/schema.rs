//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the streaming proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind host and port).
    pub listener: ListenerConfig,

    /// Worker pool sizing and recycling.
    pub workers: WorkerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Trusted forwarding proxies.
    pub forwarding: ForwardingConfig,

    /// Origin connection and relay settings.
    pub upstream: UpstreamConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Host or address to bind (e.g., "0.0.0.0").
    pub host: String,

    /// TCP port to listen on.
    pub port: u16,
}

impl ListenerConfig {
    /// `host:port` form used in logs and errors.
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8888,
        }
    }
}

/// How the pool picks a worker for a new connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicyKind {
    #[default]
    RoundRobin,
    LeastLoaded,
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of workers, fixed for the process lifetime.
    pub count: usize,

    /// Requests served before a worker is recycled (0 disables recycling).
    pub max_requests: u64,

    /// Upper bound of the random extra requests added per worker.
    pub max_requests_jitter: u64,

    /// Maximum concurrent connections per worker.
    pub worker_connections: usize,

    /// Worker selection policy.
    pub policy: SelectionPolicyKind,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 4,
            max_requests: 500,
            max_requests_jitter: 200,
            worker_connections: 1000,
            policy: SelectionPolicyKind::RoundRobin,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Overall request timeout, accept to final byte, in seconds.
    /// Also bounds how long a draining worker waits for its connections.
    pub request_secs: u64,

    /// Origin connection establishment timeout in seconds.
    pub connect_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 120,
            connect_secs: 10,
        }
    }
}

/// Which entry of the forwarding header names the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ForwardedPick {
    /// The first (original client) entry.
    #[default]
    Leftmost,
    /// Walk from the right, skipping trusted hops.
    RightmostUntrusted,
}

/// Trusted-proxy configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ForwardingConfig {
    /// Peer addresses or CIDR ranges whose forwarding headers are honored.
    /// `*` trusts every peer.
    pub allow_ips: Vec<String>,

    /// Header carrying the client address chain.
    pub client_header: String,

    /// Header carrying the original scheme.
    pub proto_header: String,

    /// Entry selection within the client header.
    pub pick: ForwardedPick,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            allow_ips: vec!["127.0.0.1".to_string()],
            client_header: "x-forwarded-for".to_string(),
            proto_header: "x-forwarded-proto".to_string(),
            pick: ForwardedPick::Leftmost,
        }
    }
}

/// Origin connection and relay configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Largest chunk relayed in one write, in bytes.
    pub chunk_size: usize,

    /// Extra attempts for connect failures before any response started.
    pub connect_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub retry_base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub retry_max_delay_ms: u64,

    /// Idle upstream connections are closed after this many seconds.
    pub pool_idle_timeout_secs: u64,

    /// Idle upstream connections kept per origin host.
    pub pool_max_idle_per_host: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            connect_retries: 2,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 1000,
            pool_idle_timeout_secs: 90,
            pool_max_idle_per_host: 10,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Access log destination: `-` for stdout or a file path. None disables it.
    pub access_log: Option<String>,

    /// Error log destination: `-` for stderr or a file path.
    pub error_log: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            access_log: None,
            error_log: "-".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
