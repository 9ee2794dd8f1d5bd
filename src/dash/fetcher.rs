use std::fs;
use std::time::Duration;

use anyhow::{Context, Result};
use log::trace;

use crate::error::StreamError;
use crate::utils::{is_remote_src, local_path};

pub type HttpClient = reqwest::blocking::Client;

/// Retrieves the bytes behind a url.
pub trait Fetch: Send + Sync {
    fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, StreamError>;
}

/// Fetches over HTTP(S), or from the filesystem for `file://` urls and plain paths.
#[derive(Clone)]
pub struct Fetcher {
    http_client: HttpClient,
}

impl Fetcher {
    pub fn new() -> Result<Fetcher> {
        let http_client = HttpClient::builder()
            .timeout(Duration::new(10, 0))
            .gzip(true)
            .build()
            .context("building reqwest HTTP client")?;
        Ok(Fetcher { http_client })
    }

    fn fetch_remote(&self, url: &str) -> reqwest::Result<Vec<u8>> {
        let bytes = self
            .http_client
            .get(url)
            .send()?
            .error_for_status()?
            .bytes()?;
        Ok(bytes.to_vec())
    }
}

impl Fetch for Fetcher {
    fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, StreamError> {
        trace!("[fetcher] fetching {url}");
        if is_remote_src(url) {
            self.fetch_remote(url)
                .map_err(|e| StreamError::transfer(url, e))
        } else {
            fs::read(local_path(url)).map_err(|e| StreamError::transfer(url, e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_local_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame_0.ply");
        fs::write(&path, b"ply\n").unwrap();

        let fetcher = Fetcher::new().unwrap();
        let path_str = path.to_str().unwrap();
        assert_eq!(fetcher.fetch(path_str).unwrap(), b"ply\n");
        assert_eq!(fetcher.fetch(&format!("file://{path_str}")).unwrap(), b"ply\n");

        match fetcher.fetch(&format!("{path_str}.missing")) {
            Err(StreamError::Transfer { url, .. }) => assert!(url.ends_with(".missing")),
            other => panic!("expected transfer error, got {other:?}"),
        }
    }
}
