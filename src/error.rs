use thiserror::Error;

use crate::crypto::CryptoError;
use crate::ply::FormatError;

/// Failures that can befall a single segment or a streaming session.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("Failed to fetch {url}: {reason}")]
    Transfer { url: String, reason: String },
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Plan lists {urls} frame urls for {frames} frames")]
    InvalidPlan { frames: usize, urls: usize },
    #[error("The {0} thread panicked")]
    WorkerPanicked(&'static str),
}

impl StreamError {
    pub fn transfer(url: &str, reason: impl ToString) -> Self {
        StreamError::Transfer {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}
