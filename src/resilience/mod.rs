//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to origin:
//!     → connect timeout (upstream connector)
//!     → On connect failure: retries.rs (replayable? attempts left?)
//!     → backoff.rs (doubling delay, capped, jittered downward)
//! ```
//!
//! # Design Decisions
//! - Only connection establishment is retried; once response bytes have
//!   reached the client a failure truncates the response instead
//! - Requests with a body are never replayed

pub mod backoff;
pub mod retries;

pub use backoff::Backoff;
pub use retries::ConnectRetry;
