//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → forwarded.rs (resolve true client from trusted peers only)
//!     → headers.rs (strip hop-by-hop and forwarding headers)
//!     → Pass to proxy handler
//! ```
//!
//! # Design Decisions
//! - No trust in client input: forwarding headers need an allow-listed peer
//! - Fail safe: malformed headers degrade to the raw peer address

pub mod forwarded;
pub mod headers;

pub use forwarded::{ClientSource, Resolution, TrustedProxies};
