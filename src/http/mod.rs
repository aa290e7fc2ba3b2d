//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted connection
//!     → server.rs (accept loop, hand-off to the worker pool)
//!     → dispatcher.rs (per worker: HTTP/1.1, client resolution, deadline)
//!     → proxy::handler (routes, upstream session, relay)
//!     → response.rs (error → status code)
//!     → Send to client
//! ```

pub mod dispatcher;
pub mod response;
pub mod server;

pub use dispatcher::{Dispatcher, DispatcherFactory, RequestContext};
pub use server::HttpServer;
