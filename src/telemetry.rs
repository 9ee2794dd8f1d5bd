//! Timing and event logs of a session, and their CSV renderings.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

pub const STREAM_LOG_FILE: &str = "stream.csv";
pub const STALL_LOG_FILE: &str = "stalls.csv";
pub const PLAYER_LOG_FILE: &str = "player.csv";

pub fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Pipeline timings for one segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRecord {
    pub frame: usize,
    pub download_ms: f64,
    pub decrypt_ms: f64,
    pub buffer_count: usize,
    pub timestamp_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StallRecord {
    pub start_ms: f64,
    pub duration_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEventKind {
    InitialWait,
    PlaybackStart,
    StallStart,
    StallEnd,
    Consume,
    ConsumeFailed,
    PlaybackEnd,
}

impl PlayerEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerEventKind::InitialWait => "waiting_for_initial_buffer",
            PlayerEventKind::PlaybackStart => "playback_start",
            PlayerEventKind::StallStart => "stall_start",
            PlayerEventKind::StallEnd => "stall_end",
            PlayerEventKind::Consume => "consume_frame",
            PlayerEventKind::ConsumeFailed => "consume_failed",
            PlayerEventKind::PlaybackEnd => "playback_end",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerEvent {
    pub timestamp_ms: f64,
    pub kind: PlayerEventKind,
    /// Frames played when the event was recorded.
    pub frame: usize,
    pub buffer_count: usize,
}

/// Written by the pipeline side only.
#[derive(Debug, Clone, Default)]
pub struct StreamLog {
    frames: Vec<FrameRecord>,
}

impl StreamLog {
    pub fn with_capacity(frames: usize) -> Self {
        StreamLog {
            frames: Vec::with_capacity(frames),
        }
    }

    pub fn push(&mut self, record: FrameRecord) {
        self.frames.push(record);
    }

    pub fn frames(&self) -> &[FrameRecord] {
        &self.frames
    }

    pub fn write_csv<W: Write>(&self, mut w: W) -> io::Result<()> {
        writeln!(w, "frame,download_ms,decrypt_ms,buffer_count,timestamp_ms")?;
        for r in &self.frames {
            writeln!(
                w,
                "{},{:.2},{:.2},{},{:.3}",
                r.frame, r.download_ms, r.decrypt_ms, r.buffer_count, r.timestamp_ms
            )?;
        }
        w.flush()
    }
}

/// Written by the player thread only.
#[derive(Debug, Clone, Default)]
pub struct PlayerLog {
    events: Vec<PlayerEvent>,
    stalls: Vec<StallRecord>,
}

impl PlayerLog {
    pub fn record(&mut self, event: PlayerEvent) {
        self.events.push(event);
    }

    pub fn record_stall(&mut self, stall: StallRecord) {
        self.stalls.push(stall);
    }

    pub fn events(&self) -> &[PlayerEvent] {
        &self.events
    }

    pub fn stalls(&self) -> &[StallRecord] {
        &self.stalls
    }

    pub fn total_stall_ms(&self) -> f64 {
        self.stalls.iter().map(|s| s.duration_ms).sum()
    }

    pub fn write_events_csv<W: Write>(&self, mut w: W) -> io::Result<()> {
        writeln!(w, "timestamp_ms,event,current_frame,buffer_count")?;
        for e in &self.events {
            writeln!(
                w,
                "{:.3},{},{},{}",
                e.timestamp_ms,
                e.kind.as_str(),
                e.frame,
                e.buffer_count
            )?;
        }
        w.flush()
    }

    pub fn write_stalls_csv<W: Write>(&self, mut w: W) -> io::Result<()> {
        writeln!(w, "stall_start_ms,duration_ms")?;
        for s in &self.stalls {
            writeln!(w, "{:.2},{:.2}", s.start_ms, s.duration_ms)?;
        }
        w.flush()
    }
}

/// Writes the three session logs into `dir`, creating it if needed.
pub fn write_logs(dir: &Path, stream: &StreamLog, player: &PlayerLog) -> io::Result<()> {
    std::fs::create_dir_all(dir)?;
    stream.write_csv(BufWriter::new(File::create(dir.join(STREAM_LOG_FILE))?))?;
    player.write_stalls_csv(BufWriter::new(File::create(dir.join(STALL_LOG_FILE))?))?;
    player.write_events_csv(BufWriter::new(File::create(dir.join(PLAYER_LOG_FILE))?))?;
    Ok(())
}
