//! Manifest and segment retrieval.

pub mod fetcher;
pub mod parser;

pub use fetcher::{Fetch, Fetcher, HttpClient};
pub use parser::{ManifestError, ManifestPlan};
