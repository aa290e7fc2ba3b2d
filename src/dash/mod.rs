//! DASH to HLS conversion.
//!
//! # Data Flow
//! ```text
//! MPD XML (fetched by the proxy)
//!     → mpd.rs (profiles, absolute init and segment URLs)
//!     → hls.rs (master playlist, per-profile media playlist)
//!     → links back into the proxy's playlist and segment routes
//! ```
//!
//! # Design Decisions
//! - Parsing is pure: the caller supplies the MPD URL and the current time
//! - Encrypted content is passed through untouched; there is no decryption

pub mod hls;
pub mod mpd;
pub mod template;

pub use hls::{master_playlist, media_playlist, MPEGURL};
pub use mpd::{parse, Manifest, ManifestError, Profile, Segment};
