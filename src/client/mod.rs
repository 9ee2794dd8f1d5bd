//! Command line surface and session orchestration of the streaming client.

pub mod args;
pub mod session;

pub use args::Args;
pub use session::{Session, SessionConfig, SessionReport, ADMIT_RETRY_INTERVAL};
