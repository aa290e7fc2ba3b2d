//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! defaults (schema.rs)
//!     → optional TOML file (loader.rs)
//!     → environment + flags (cli.rs)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → shared via Arc/clone to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; pool size is static for the process
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod cli;
pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::ForwardedPick;
pub use schema::ForwardingConfig;
pub use schema::ListenerConfig;
pub use schema::ObservabilityConfig;
pub use schema::ProxyConfig;
pub use schema::SelectionPolicyKind;
pub use schema::TimeoutConfig;
pub use schema::UpstreamConfig;
pub use schema::WorkerConfig;
