//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the error log and the optional access log
//! - Route access events to their own destination
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - `RUST_LOG` overrides the configured level when set
//! - `-` means the process's standard stream (stderr for errors, stdout for access)

use std::fs::OpenOptions;
use std::io;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::filter::{EnvFilter, ParseError, Targets};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer};

use crate::config::ObservabilityConfig;

/// Target of access log events.
pub const ACCESS_TARGET: &str = "stream_proxy::access";

/// Logging setup failures.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("cannot open log file {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid log filter: {0}")]
    Filter(#[from] ParseError),
    #[error("logging already initialized: {0}")]
    Init(#[from] TryInitError),
}

/// Install the global subscriber.
pub fn init_logging(config: &ObservabilityConfig) -> Result<(), LoggingError> {
    let error_layer = fmt::layer()
        .with_writer(open_writer(&config.error_log, || {
            BoxMakeWriter::new(io::stderr)
        })?)
        .with_ansi(config.error_log == "-")
        .with_filter(error_filter(&config.log_level)?);

    let access_layer = match &config.access_log {
        Some(dest) => Some(
            fmt::layer()
                .with_writer(open_writer(dest, || BoxMakeWriter::new(io::stdout))?)
                .with_ansi(false)
                .with_target(false)
                .with_level(false)
                .with_filter(Targets::new().with_target(ACCESS_TARGET, Level::INFO)),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(error_layer)
        .with(access_layer)
        .try_init()?;
    Ok(())
}

fn error_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(format!("{level},tower_http=warn,hyper=warn"))?,
    };
    Ok(filter.add_directive(format!("{ACCESS_TARGET}=off").parse()?))
}

/// `-` selects the given standard stream; anything else is a file opened for append.
fn open_writer(
    dest: &str,
    standard: impl FnOnce() -> BoxMakeWriter,
) -> Result<BoxMakeWriter, LoggingError> {
    if dest == "-" {
        return Ok(standard());
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dest)
        .map_err(|source| LoggingError::Open {
            path: dest.to_string(),
            source,
        })?;
    Ok(BoxMakeWriter::new(Arc::new(file)))
}
