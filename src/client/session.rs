use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::crypto::CryptoContext;
use crate::dash::{Fetch, ManifestPlan};
use crate::error::StreamError;
use crate::player::{Clock, MonotonicClock, VirtualPlayer};
use crate::stream::{PlayoutBuffer, SegmentUnit, TransferQueue};
use crate::telemetry::{self, millis, FrameRecord, PlayerLog, StreamLog};
use crate::utils::frame_output_path;

/// Interval between admission attempts while the playout buffer is full.
pub const ADMIT_RETRY_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub buffer_seconds: u32,
    pub download_queue: usize,
    /// Where per-frame output goes, if anywhere.
    pub output_dir: Option<PathBuf>,
}

/// One streaming run over a manifest plan.
///
/// Without a crypto context segments are fetched and admitted one after another. With one, a
/// fetcher thread feeds a [`TransferQueue`] that the calling thread drains, decrypts and admits.
/// The player runs on its own thread in both modes.
pub struct Session {
    plan: ManifestPlan,
    config: SessionConfig,
    fetcher: Arc<dyn Fetch>,
    crypto: Option<CryptoContext>,
    clock: Arc<dyn Clock>,
}

impl Session {
    pub fn new(plan: ManifestPlan, config: SessionConfig, fetcher: Arc<dyn Fetch>) -> Self {
        Session {
            plan,
            config,
            fetcher,
            crypto: None,
            clock: Arc::new(MonotonicClock::new()),
        }
    }

    pub fn with_decryption(mut self, crypto: CryptoContext) -> Self {
        self.crypto = Some(crypto);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn run(self) -> Result<SessionReport, StreamError> {
        let urls = self.plan.frame_urls.len();
        if urls != self.plan.total_frames || urls == 0 {
            return Err(StreamError::InvalidPlan {
                frames: self.plan.total_frames,
                urls,
            });
        }
        if let Some(dir) = &self.config.output_dir {
            fs::create_dir_all(dir)?;
        }

        let buffer = Arc::new(PlayoutBuffer::for_duration(
            self.config.buffer_seconds,
            self.plan.frame_rate,
        ));
        info!(
            "[session] {} frames at {} fps, buffer of {} frames, {}",
            self.plan.total_frames,
            self.plan.frame_rate,
            buffer.capacity(),
            if self.crypto.is_some() { "pipelined" } else { "sequential" }
        );

        let player = VirtualPlayer::new(
            Arc::clone(&buffer),
            Arc::clone(&self.clock),
            self.plan.frame_rate,
            self.plan.total_frames,
        )
        .spawn()?;

        let stream = match &self.crypto {
            Some(crypto) => self.run_pipelined(crypto, &buffer)?,
            None => self.run_sequential(&buffer),
        };

        let player = player
            .join()
            .map_err(|_| StreamError::WorkerPanicked("player"))?;
        let report = SessionReport {
            stream,
            player,
            skipped: buffer.skipped(),
        };
        info!(
            "[session] admitted {} frames, skipped {}, {} stalls totalling {:.2} ms",
            report.admitted(),
            report.skipped,
            report.player.stalls().len(),
            report.player.total_stall_ms()
        );
        Ok(report)
    }

    fn run_sequential(&self, buffer: &PlayoutBuffer) -> StreamLog {
        let mut log = StreamLog::with_capacity(self.plan.total_frames);
        for (index, url) in self.plan.frame_urls.iter().enumerate() {
            let started = self.clock.now();
            let fetched = self.fetcher.fetch(url);
            let download_ms = millis(self.clock.now().saturating_sub(started));

            match fetched {
                Ok(bytes) => {
                    if let Some(dir) = &self.config.output_dir {
                        let path = frame_output_path(dir, index);
                        if let Err(e) = fs::write(&path, &bytes) {
                            warn!("[session] failed to write {}: {e}", path.display());
                        }
                    }
                    self.admit(buffer);
                }
                Err(e) => {
                    warn!("[fetcher] {e}");
                    buffer.skip();
                }
            }
            log.push(self.frame_record(index, download_ms, 0.0, buffer));
        }
        log
    }

    fn run_pipelined(
        &self,
        crypto: &CryptoContext,
        buffer: &PlayoutBuffer,
    ) -> Result<StreamLog, StreamError> {
        let queue = Arc::new(TransferQueue::new(self.config.download_queue));
        let producer = {
            let queue = Arc::clone(&queue);
            let fetcher = Arc::clone(&self.fetcher);
            let clock = Arc::clone(&self.clock);
            let urls = self.plan.frame_urls.clone();
            thread::Builder::new()
                .name("fetcher".to_string())
                .spawn(move || {
                    for (sequence_index, url) in urls.iter().enumerate() {
                        let started = clock.now();
                        let payload = fetcher.fetch(url);
                        let download_latency = clock.now().saturating_sub(started);
                        if let Err(e) = &payload {
                            warn!("[fetcher] {e}");
                        }
                        queue.push(SegmentUnit {
                            sequence_index,
                            payload,
                            download_latency,
                        });
                    }
                    debug!("[fetcher] all {} segments queued", urls.len());
                })?
        };

        let mut log = StreamLog::with_capacity(self.plan.total_frames);
        for _ in 0..self.plan.total_frames {
            let unit = queue.pop();
            let mut decrypt_ms = 0.0;
            let admitted = match &unit.payload {
                Ok(bytes) => {
                    let started = self.clock.now();
                    let result = self.decrypt_segment(crypto, unit.sequence_index, bytes);
                    decrypt_ms = millis(self.clock.now().saturating_sub(started));
                    match result {
                        Ok(()) => true,
                        Err(e) => {
                            warn!("[decryptor] frame {}: {e}", unit.sequence_index);
                            false
                        }
                    }
                }
                Err(_) => false,
            };

            if admitted {
                self.admit(buffer);
            } else {
                buffer.skip();
            }
            log.push(self.frame_record(
                unit.sequence_index,
                millis(unit.download_latency),
                decrypt_ms,
                buffer,
            ));
        }

        producer
            .join()
            .map_err(|_| StreamError::WorkerPanicked("fetcher"))?;
        Ok(log)
    }

    /// Decrypts one segment, streaming it to its output file when output is enabled.
    ///
    /// The output file of a segment that fails is removed again.
    fn decrypt_segment(
        &self,
        crypto: &CryptoContext,
        index: usize,
        bytes: &[u8],
    ) -> Result<(), StreamError> {
        let path = self
            .config
            .output_dir
            .as_ref()
            .map(|dir| frame_output_path(dir, index));
        let mut writer = path.as_deref().and_then(open_output);

        let sink = writer.as_mut().map(|w| w as &mut dyn Write);
        let result = crypto.decrypt_to(bytes, sink).map(|_| ());

        if let (Some(mut w), Some(path)) = (writer, path) {
            match &result {
                Ok(()) => {
                    if let Err(e) = w.flush() {
                        warn!("[decryptor] failed to flush {}: {e}", path.display());
                    }
                }
                Err(_) => {
                    drop(w);
                    if let Err(e) = fs::remove_file(&path) {
                        warn!("[decryptor] failed to remove {}: {e}", path.display());
                    }
                }
            }
        }
        result
    }

    fn admit(&self, buffer: &PlayoutBuffer) {
        while !buffer.try_admit() {
            self.clock.sleep(ADMIT_RETRY_INTERVAL);
        }
    }

    fn frame_record(
        &self,
        frame: usize,
        download_ms: f64,
        decrypt_ms: f64,
        buffer: &PlayoutBuffer,
    ) -> FrameRecord {
        FrameRecord {
            frame,
            download_ms,
            decrypt_ms,
            buffer_count: buffer.occupied(),
            timestamp_ms: millis(self.clock.now()),
        }
    }
}

fn open_output(path: &Path) -> Option<BufWriter<File>> {
    match File::create(path) {
        Ok(file) => Some(BufWriter::new(file)),
        Err(e) => {
            warn!("[decryptor] failed to create {}: {e}", path.display());
            None
        }
    }
}

/// Logs of a finished session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub stream: StreamLog,
    pub player: PlayerLog,
    pub skipped: usize,
}

impl SessionReport {
    pub fn admitted(&self) -> usize {
        self.stream.frames().len() - self.skipped
    }

    /// Writes the frame, stall and player logs into `dir`.
    pub fn flush(&self, dir: &Path) -> io::Result<()> {
        telemetry::write_logs(dir, &self.stream, &self.player)
    }
}
