//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, request deadline)
//!     → connection.rs (id, peer, deadline, in-flight guard)
//!     → Worker pool assignment
//! ```
//!
//! # Design Decisions
//! - The deadline is fixed at accept time and covers the whole exchange
//! - Each connection is tracked by its worker for draining

pub mod connection;
pub mod listener;

pub use connection::{Connection, ConnectionId, InFlightGuard, InFlightTracker};
pub use listener::Acceptor;
