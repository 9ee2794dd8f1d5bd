//! Streaming client for point cloud frames.
//!
//! Frames listed in an MPD are fetched, optionally decrypted field by field, and admitted to a
//! playout buffer that a virtual player drains at the stream's frame rate while logging stalls.

pub mod client;
pub mod crypto;
pub mod dash;
pub mod error;
pub mod player;
pub mod ply;
pub mod stream;
pub mod telemetry;
pub mod utils;

pub use error::StreamError;
