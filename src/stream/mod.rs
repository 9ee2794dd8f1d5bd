//! Hand-off between pipeline stages: the transfer queue and the playout buffer.

pub mod buffer;
pub mod queue;

use std::time::Duration;

use crate::error::StreamError;

pub use buffer::{ConsumeError, PlayoutBuffer};
pub use queue::TransferQueue;

/// One downloaded segment on its way from the fetcher to the decryptor.
#[derive(Debug)]
pub struct SegmentUnit {
    pub sequence_index: usize,
    pub payload: Result<Vec<u8>, StreamError>,
    pub download_latency: Duration,
}
