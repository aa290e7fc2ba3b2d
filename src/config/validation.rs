//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (workers > 0, timeouts > 0, chunk size > 0)
//! - Check that allow-list entries and header names parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use axum::http::HeaderName;

use crate::config::schema::ProxyConfig;
use crate::security::forwarded::parse_trusted_entry;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Check a configuration, collecting every violation.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.host.trim().is_empty() {
        errors.push(ValidationError::new("listener.host", "must not be empty"));
    }
    if config.workers.count == 0 {
        errors.push(ValidationError::new("workers.count", "must be at least 1"));
    }
    if config.workers.worker_connections == 0 {
        errors.push(ValidationError::new(
            "workers.worker_connections",
            "must be at least 1",
        ));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::new("timeouts.connect_secs", "must be greater than 0"));
    }
    if config.upstream.chunk_size == 0 {
        errors.push(ValidationError::new("upstream.chunk_size", "must be greater than 0"));
    }
    if config.upstream.retry_base_delay_ms > config.upstream.retry_max_delay_ms {
        errors.push(ValidationError::new(
            "upstream.retry_base_delay_ms",
            "must not exceed retry_max_delay_ms",
        ));
    }

    for entry in &config.forwarding.allow_ips {
        if let Err(reason) = parse_trusted_entry(entry) {
            errors.push(ValidationError::new("forwarding.allow_ips", reason));
        }
    }
    for (field, name) in [
        ("forwarding.client_header", &config.forwarding.client_header),
        ("forwarding.proto_header", &config.forwarding.proto_header),
    ] {
        if HeaderName::from_bytes(name.as_bytes()).is_err() {
            errors.push(ValidationError::new(field, format!("invalid header name {name:?}")));
        }
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level {:?}", config.observability.log_level),
        ));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("not a socket address: {}", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
