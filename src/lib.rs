//! Worker-pooled HTTP media streaming proxy library.

pub mod config;
pub mod dash;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod pool;
pub mod proxy;
pub mod resilience;
pub mod security;

pub use config::schema::ProxyConfig;
pub use error::ProxyError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use net::Acceptor;
