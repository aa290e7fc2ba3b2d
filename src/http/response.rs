//! Error responses.
//!
//! # Status mapping
//! - `UpstreamConnect`, `UpstreamStatus`, `InvalidManifest` → 502 Bad Gateway
//! - `ClientTimeout` → 504 Gateway Timeout
//! - `InvalidDestination` → 400 Bad Request
//! - `ProfileNotFound` → 404 Not Found
//! - anything else → 500

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::error::ProxyError;

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::UpstreamConnect { .. }
            | ProxyError::UpstreamStatus { .. }
            | ProxyError::InvalidManifest { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::ClientTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::InvalidDestination(_) => StatusCode::BAD_REQUEST,
            ProxyError::ProfileNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            ProxyError::InvalidDestination(_) | ProxyError::ProfileNotFound(_) => {
                tracing::debug!(error = %self, "Rejected request")
            }
            ProxyError::UpstreamConnect { .. } => tracing::warn!(error = %self, "Upstream unavailable"),
            ProxyError::ClientTimeout(_) => tracing::warn!(error = %self, "No response before the deadline"),
            ProxyError::UpstreamStatus { .. } | ProxyError::InvalidManifest { .. } => {
                tracing::warn!(error = %self, "Unusable upstream response")
            }
            _ => tracing::error!(error = %self, "Request failed"),
        }
        (status, self.to_string()).into_response()
    }
}
