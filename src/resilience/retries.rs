//! Retry logic for opening upstream streams.
//!
//! # Responsibilities
//! - Decide whether a failed upstream attempt may be retried
//! - Pace retries with a capped, jittered backoff
//!
//! # Design Decisions
//! - Only connect failures are retryable: nothing reached the origin yet
//! - A request carrying a body is not replayable; it is attempted once

use std::time::Duration;

use axum::http::{header, HeaderMap};

use crate::config::UpstreamConfig;
use crate::resilience::backoff::Backoff;

/// Retry budget for establishing one upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectRetry {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl ConnectRetry {
    pub fn from_config(config: &UpstreamConfig) -> Self {
        Self {
            max_retries: config.connect_retries,
            backoff: Backoff::new(
                Duration::from_millis(config.retry_base_delay_ms),
                Duration::from_millis(config.retry_max_delay_ms),
            ),
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Backoff::new(Duration::ZERO, Duration::ZERO),
        }
    }

    /// Whether attempt number `attempt` (1-based) may be followed by another.
    pub fn allows(&self, attempt: u32, is_connect_error: bool, replayable: bool) -> bool {
        is_connect_error && replayable && attempt <= self.max_retries
    }

    /// Delay before the attempt following `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }
}

/// A request can be replayed when it carries no body.
pub fn is_replayable(headers: &HeaderMap) -> bool {
    if headers.contains_key(header::TRANSFER_ENCODING) {
        return false;
    }
    match headers.get(header::CONTENT_LENGTH) {
        None => true,
        Some(v) => v
            .to_str()
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            == Some(0),
    }
}
