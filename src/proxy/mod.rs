//! Streaming proxy subsystem.
//!
//! # Data Flow
//! ```text
//! Request (with RequestContext from the dispatcher)
//!     → request.rs (origin URL from `d`, `h_` header overrides, sanitize)
//!     → upstream.rs (open session, retry connect failures)
//!     → relay.rs (bounded chunks both ways, shared cancellation)
//!     → Response streamed to the client
//! ```
//!
//! The `mpd.rs` routes reuse the same pieces for DASH origins: the MPD is
//! fetched and rendered as HLS playlists, and segments go through the relay.
//!
//! # Design Decisions
//! - Bodies are never buffered whole; memory per connection is bounded by
//!   the chunk size and hyper's own buffers
//! - Once the response head is sent, failures truncate instead of retrying

pub mod handler;
pub mod mpd;
pub mod relay;
pub mod request;
pub mod upstream;

pub use handler::{build_router, ProxyState};
pub use relay::Relay;
pub use request::ProxyRequest;
pub use upstream::{UpstreamClient, UpstreamConnector, UpstreamSession};
