//! Command-line and environment configuration.
//!
//! Precedence, lowest to highest: defaults, TOML file, environment, flags.
//! Environment variables are read by clap, so a flag always beats its
//! environment counterpart.

use std::path::PathBuf;

use clap::Parser;

use crate::config::loader::{read_config, ConfigError};
use crate::config::schema::ProxyConfig;
use crate::config::validation::validate_config;

#[derive(Debug, Parser)]
#[command(name = "stream-proxy")]
#[command(version, about = "Worker-pooled HTTP media streaming proxy", long_about = None)]
pub struct Cli {
    /// TOML configuration file.
    #[arg(short, long, env = "STREAM_PROXY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Host or address to bind.
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on.
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Number of workers.
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum concurrent connections per worker.
    #[arg(long)]
    pub worker_connections: Option<usize>,

    /// Request timeout in seconds.
    #[arg(short = 't', long)]
    pub timeout: Option<u64>,

    /// Requests a worker serves before it is recycled (0 disables).
    #[arg(long)]
    pub max_requests: Option<u64>,

    /// Random extra requests added to each worker's recycle threshold.
    #[arg(long)]
    pub max_requests_jitter: Option<u64>,

    /// Comma-separated peer addresses/CIDRs trusted to set forwarding headers.
    #[arg(long, env = "FORWARDED_ALLOW_IPS", value_delimiter = ',')]
    pub forwarded_allow_ips: Option<Vec<String>>,

    /// Access log destination (`-` for stdout).
    #[arg(long)]
    pub access_logfile: Option<String>,

    /// Error log destination (`-` for stderr).
    #[arg(long)]
    pub error_logfile: Option<String>,

    /// Log verbosity (trace, debug, info, warn, error).
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Relay chunk size in bytes.
    #[arg(long)]
    pub chunk_size: Option<usize>,
}

impl Cli {
    /// Build the effective configuration and validate it.
    pub fn load(&self) -> Result<ProxyConfig, ConfigError> {
        let base = match &self.config {
            Some(path) => read_config(path)?,
            None => ProxyConfig::default(),
        };
        let config = self.apply(base);
        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }

    /// Overlay flags (and their environment fallbacks) onto `config`.
    pub fn apply(&self, mut config: ProxyConfig) -> ProxyConfig {
        if let Some(host) = &self.host {
            config.listener.host = host.clone();
        }
        if let Some(port) = self.port {
            config.listener.port = port;
        }
        if let Some(workers) = self.workers {
            config.workers.count = workers;
        }
        if let Some(connections) = self.worker_connections {
            config.workers.worker_connections = connections;
        }
        if let Some(timeout) = self.timeout {
            config.timeouts.request_secs = timeout;
        }
        if let Some(max_requests) = self.max_requests {
            config.workers.max_requests = max_requests;
        }
        if let Some(jitter) = self.max_requests_jitter {
            config.workers.max_requests_jitter = jitter;
        }
        if let Some(allow) = &self.forwarded_allow_ips {
            config.forwarding.allow_ips = allow
                .iter()
                .map(|entry| entry.trim().to_string())
                .filter(|entry| !entry.is_empty())
                .collect();
        }
        if let Some(access) = &self.access_logfile {
            config.observability.access_log = Some(access.clone());
        }
        if let Some(error) = &self.error_logfile {
            config.observability.error_log = error.clone();
        }
        if let Some(level) = &self.log_level {
            config.observability.log_level = level.clone();
        }
        if let Some(chunk_size) = self.chunk_size {
            config.upstream.chunk_size = chunk_size;
        }
        config
    }
}
