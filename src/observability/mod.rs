//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, error log + access log)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Error log (stderr or file)
//!     → Access log (stdout or file), one line per served connection
//!     → Metrics endpoint (Prometheus scrape), when enabled
//! ```
//!
//! # Design Decisions
//! - Access lines are ordinary tracing events under a dedicated target,
//!   routed to their own layer
//! - Metrics are cheap (atomic increments); recording without an
//!   installed exporter is a no-op

pub mod logging;
pub mod metrics;
