use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use vvstream::client::{Args, Session};
use vvstream::dash::{Fetcher, ManifestPlan};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let config = args.session_config()?;
    let crypto = args.crypto_context()?;

    let fetcher = Arc::new(Fetcher::new()?);
    let plan = ManifestPlan::load(&args.url, fetcher.as_ref())
        .with_context(|| format!("failed to parse MPD: {}", args.url))?;
    info!(
        "MPD: {} frames at {} fps from {}",
        plan.total_frames, plan.frame_rate, args.url
    );

    let mut session = Session::new(plan, config, fetcher);
    if let Some(crypto) = crypto {
        session = session.with_decryption(crypto);
    }
    let report = session.run().context("streaming session failed")?;
    report
        .flush(&args.log_dir)
        .with_context(|| format!("failed to write logs to {}", args.log_dir.display()))?;
    Ok(())
}
