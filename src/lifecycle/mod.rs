//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Recycling (recycler.rs):
//!     Worker reaches threshold → Drains → Exits → Replaced in its slot
//!
//! Shutdown (shutdown.rs):
//!     Stop triggered (with its reason) → Stop accepting → Drain every worker → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain, close
//! - Draining is bounded by the request timeout; stragglers are aborted

pub mod recycler;
pub mod shutdown;
pub mod signals;

pub use recycler::{RecyclePolicy, WorkerExit};
pub use shutdown::{Shutdown, ShutdownSignal, StopReason};
