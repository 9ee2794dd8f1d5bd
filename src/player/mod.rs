//! The virtual player: a frame-rate paced consumer of the playout buffer.

pub mod clock;
pub mod scheduler;

pub use clock::{Clock, MonotonicClock, SimulatedClock};
pub use scheduler::{frame_deadline, PlayerState, VirtualPlayer, POLL_INTERVAL};
