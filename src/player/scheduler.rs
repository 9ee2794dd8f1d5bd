use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, trace, warn};

use super::clock::Clock;
use crate::stream::PlayoutBuffer;
use crate::telemetry::{millis, PlayerEvent, PlayerEventKind, PlayerLog, StallRecord};

/// Interval between occupancy polls while waiting for frames.
pub const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Absolute deadline of the frame played after `played` frames, anchored at `origin`.
pub fn frame_deadline(origin: Duration, played: u64, fps: u32) -> Duration {
    let nanos = (played as u128 + 1) * 1_000_000_000 / fps.max(1) as u128;
    origin + Duration::from_nanos(nanos as u64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    AwaitingInitialFill,
    Playing,
    Stalled,
    Done,
}

/// Drains the playout buffer at a fixed frame rate, recording stalls.
pub struct VirtualPlayer {
    buffer: Arc<PlayoutBuffer>,
    clock: Arc<dyn Clock>,
    fps: u32,
    total_frames: usize,
    poll_interval: Duration,
    state: PlayerState,
    played: usize,
    log: PlayerLog,
}

impl VirtualPlayer {
    pub fn new(buffer: Arc<PlayoutBuffer>, clock: Arc<dyn Clock>, fps: u32, total_frames: usize) -> Self {
        VirtualPlayer {
            buffer,
            clock,
            fps,
            total_frames,
            poll_interval: POLL_INTERVAL,
            state: PlayerState::AwaitingInitialFill,
            played: 0,
            log: PlayerLog::default(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn spawn(self) -> io::Result<JoinHandle<PlayerLog>> {
        thread::Builder::new()
            .name("player".to_string())
            .spawn(move || self.run())
    }

    /// Plays every expected frame and returns the event log.
    pub fn run(mut self) -> PlayerLog {
        self.await_initial_fill();

        let origin = self.clock.now();
        self.transition(PlayerState::Playing);
        self.record(PlayerEventKind::PlaybackStart);
        info!(
            "[player] playback started with {} frames buffered",
            self.buffer.occupied()
        );

        let mut stall_start = None;
        while self.played < self.expected_frames() {
            if self.buffer.occupied() == 0 {
                if stall_start.is_none() {
                    stall_start = Some(self.clock.now());
                    self.transition(PlayerState::Stalled);
                    self.record(PlayerEventKind::StallStart);
                }
                self.clock.sleep(self.poll_interval);
                continue;
            }
            if let Some(start) = stall_start.take() {
                self.end_stall(start);
            }

            match self.buffer.consume() {
                Ok(()) => {
                    let deadline = frame_deadline(origin, self.played as u64, self.fps);
                    self.played += 1;
                    self.record(PlayerEventKind::Consume);
                    self.clock.sleep_until(deadline);
                }
                Err(e) => {
                    warn!("[player] consume failed at frame {}: {e}", self.played);
                    self.record(PlayerEventKind::ConsumeFailed);
                    self.clock.sleep(self.poll_interval);
                }
            }
        }
        if let Some(start) = stall_start.take() {
            self.end_stall(start);
        }

        self.transition(PlayerState::Done);
        self.record(PlayerEventKind::PlaybackEnd);
        info!(
            "[player] played {} frames, {} stalls",
            self.played,
            self.log.stalls().len()
        );
        self.log
    }

    /// Frames that will actually reach the buffer.
    fn expected_frames(&self) -> usize {
        self.total_frames.saturating_sub(self.buffer.skipped())
    }

    fn await_initial_fill(&mut self) {
        self.transition(PlayerState::AwaitingInitialFill);
        loop {
            let watermark = self.buffer.capacity().min(self.expected_frames());
            if self.buffer.occupied() >= watermark {
                return;
            }
            self.clock.sleep(self.poll_interval);
            self.record(PlayerEventKind::InitialWait);
        }
    }

    fn end_stall(&mut self, start: Duration) {
        let duration = self.clock.now().saturating_sub(start);
        self.log.record_stall(StallRecord {
            start_ms: millis(start),
            duration_ms: millis(duration),
        });
        self.transition(PlayerState::Playing);
        self.record(PlayerEventKind::StallEnd);
        debug!(
            "[player] stall at frame {} lasted {:.2} ms",
            self.played,
            millis(duration)
        );
    }

    fn transition(&mut self, next: PlayerState) {
        if self.state != next {
            trace!("[player] {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    fn record(&mut self, kind: PlayerEventKind) {
        self.log.record(PlayerEvent {
            timestamp_ms: millis(self.clock.now()),
            kind,
            frame: self.played,
            buffer_count: self.buffer.occupied(),
        });
    }
}
