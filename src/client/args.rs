use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

use crate::crypto::CryptoContext;
use crate::ply::FieldMask;

use super::session::SessionConfig;

/// Streams the frames listed in an MPD into a simulated player and logs the playback.
#[derive(Parser, Debug)]
#[clap(name = "vvstream")]
pub struct Args {
    /// MPD location (http(s) url, file:// url or path)
    #[clap(long)]
    pub url: String,
    /// Playout buffer depth in seconds
    #[clap(long = "buffer")]
    pub buffer_seconds: u32,
    /// Decrypt the segments (needs --pub, --priv and --pattern)
    #[clap(long, action = clap::ArgAction::SetTrue)]
    pub decrypt: bool,
    /// Public parameters file
    #[clap(long = "pub")]
    pub pub_key: Option<PathBuf>,
    /// Private key file
    #[clap(long = "priv")]
    pub priv_key: Option<PathBuf>,
    /// Encrypted fields: x|y|z|xy|xz|yz|xyz
    #[clap(long)]
    pub pattern: Option<FieldMask>,
    /// Segments held between download and decryption
    #[clap(long, default_value_t = 1)]
    pub download_queue: usize,
    /// Store every frame under --download-dir
    #[clap(long, action = clap::ArgAction::SetTrue)]
    pub write_output: bool,
    #[clap(long, default_value = "stream-download")]
    pub download_dir: PathBuf,
    #[clap(long, default_value = "logs")]
    pub log_dir: PathBuf,
}

impl Args {
    /// Checks the flag combinations and builds the session configuration.
    pub fn session_config(&self) -> Result<SessionConfig> {
        if self.buffer_seconds == 0 {
            bail!("--buffer must be at least 1 second");
        }
        if self.download_queue == 0 {
            bail!("--download-queue must be at least 1");
        }
        if self.decrypt && (self.pub_key.is_none() || self.priv_key.is_none() || self.pattern.is_none()) {
            bail!("--decrypt requires --pub, --priv and --pattern");
        }
        Ok(SessionConfig {
            buffer_seconds: self.buffer_seconds,
            download_queue: self.download_queue,
            output_dir: self.write_output.then(|| self.download_dir.clone()),
        })
    }

    /// Loads the keys when decryption is enabled.
    pub fn crypto_context(&self) -> Result<Option<CryptoContext>> {
        if !self.decrypt {
            return Ok(None);
        }
        match (&self.pub_key, &self.priv_key, self.pattern) {
            (Some(pub_key), Some(priv_key), Some(mask)) => {
                CryptoContext::for_decryption(pub_key, priv_key, mask)
                    .map(Some)
                    .context("failed to initialise decryptor")
            }
            _ => bail!("--decrypt requires --pub, --priv and --pattern"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("vvstream").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults() {
        let args = parse(&["--url", "http://localhost/stream.mpd", "--buffer", "2"]);
        assert_eq!(args.download_queue, 1);
        assert_eq!(args.download_dir, PathBuf::from("stream-download"));
        assert_eq!(args.log_dir, PathBuf::from("logs"));
        let config = args.session_config().unwrap();
        assert_eq!(config.buffer_seconds, 2);
        assert_eq!(config.output_dir, None);
        assert!(args.crypto_context().unwrap().is_none());
    }

    #[test]
    fn decrypt_needs_keys() {
        let args = parse(&["--url", "a.mpd", "--buffer", "1", "--decrypt", "--pattern", "xy"]);
        assert_eq!(args.pattern, Some(FieldMask::new(true, true, false)));
        assert!(args.session_config().is_err());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(parse(&["--url", "a.mpd", "--buffer", "0"]).session_config().is_err());
        assert!(parse(&["--url", "a.mpd", "--buffer", "1", "--download-queue", "0"])
            .session_config()
            .is_err());
        assert!(Args::try_parse_from(["vvstream", "--url", "a.mpd", "--buffer", "1", "--pattern", "w"]).is_err());
    }

    #[test]
    fn write_output_uses_download_dir() {
        let args = parse(&[
            "--url", "a.mpd", "--buffer", "1", "--write-output", "--download-dir", "out",
        ]);
        assert_eq!(args.session_config().unwrap().output_dir, Some(PathBuf::from("out")));
    }
}
