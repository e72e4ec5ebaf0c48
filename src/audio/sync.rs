use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{try_alloc, MeasureError};

use super::stream::{as_overrun, Channel, Frame, FrameSink, FrameSource};
use super::tone::ToneGenerator;

/// Frames generated per playback refill and requested per capture poll.
pub const CHUNK_FRAMES: usize = 1024;
/// Sleep between ticks on which neither stream moved.
pub const POLL_INTERVAL: Duration = Duration::from_millis(5);
/// Capture overruns tolerated after retention has begun.
pub const MAX_RESTARTS: u32 = 8;

#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Captured frames discarded while the analog path settles.
    pub settle_frames: usize,
    /// Captured frames retained for analysis.
    pub requested_frames: usize,
    pub chunk_frames: usize,
    pub poll_interval: Duration,
    /// Give up when no capture frames arrive for this long.
    pub stall_timeout: Duration,
    pub channel: Channel,
    /// Times retention may start over after losing capture frames before the
    /// run is abandoned.
    pub max_restarts: u32,
}

impl SyncConfig {
    pub fn new(settle_frames: usize, requested_frames: usize) -> Self {
        Self {
            settle_frames,
            requested_frames,
            chunk_frames: CHUNK_FRAMES,
            poll_interval: POLL_INTERVAL,
            stall_timeout: Duration::from_secs(5),
            channel: Channel::Left,
            max_restarts: MAX_RESTARTS,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SyncStats {
    pub ticks: u64,
    pub idle_ticks: u64,
    pub frames_written: u64,
    pub frames_read: u64,
    pub write_errors: u64,
    pub read_errors: u64,
    /// Capture overruns reported by the source.
    pub overruns: u64,
    /// Overruns that threw away retained samples.
    pub restarts: u32,
    /// Silent playback frames while samples were being retained.
    pub underruns: u64,
}

pub struct Capture {
    pub samples: Vec<f64>,
    pub stats: SyncStats,
}

/// Drives playback of the test tone and collection of the loop-back capture
/// on a single thread, polling both non-blocking streams in turn.
pub struct StreamSynchronizer {
    tone: ToneGenerator,
    config: SyncConfig,
    out_buf: Vec<Frame>,
    in_buf: Vec<Frame>,
    pending: usize,
    out_offset: usize,
    frames_seen: usize,
    block: Vec<f64>,
    stats: SyncStats,
}

impl StreamSynchronizer {
    pub fn new(tone: ToneGenerator, config: SyncConfig) -> Result<Self, MeasureError> {
        if config.requested_frames == 0 {
            return Err(MeasureError::Configuration(
                "requested capture length must be positive".into(),
            ));
        }
        if config.chunk_frames == 0 {
            return Err(MeasureError::Configuration("chunk size must be positive".into()));
        }
        let out_buf = try_alloc("playback buffer", config.chunk_frames)?;
        let in_buf = try_alloc("capture buffer", config.chunk_frames)?;
        let block = try_alloc("sample block", config.requested_frames)?;
        Ok(Self {
            tone,
            config,
            out_buf,
            in_buf,
            pending: 0,
            out_offset: 0,
            frames_seen: 0,
            block,
            stats: SyncStats::default(),
        })
    }

    fn retained(&self) -> usize {
        self.frames_seen
            .saturating_sub(self.config.settle_frames)
            .min(self.config.requested_frames)
    }

    /// Run until exactly `requested_frames` samples past the settle window have
    /// been captured. `progress` is called with the retained count whenever it
    /// changes (it drops back when a capture overrun restarts retention);
    /// `stop` is checked once per tick.
    pub fn run<K, S, P>(
        mut self,
        sink: &mut K,
        source: &mut S,
        stop: &AtomicBool,
        mut progress: P,
    ) -> Result<Capture, MeasureError>
    where
        K: FrameSink,
        S: FrameSource,
        P: FnMut(usize),
    {
        let total = self.config.settle_frames + self.config.requested_frames;
        log::debug!(
            "Synchronizer: settle {} frames, retain {} frames, chunk {}",
            self.config.settle_frames,
            self.config.requested_frames,
            self.config.chunk_frames
        );

        let mut last_input = Instant::now();
        let mut underrun_base = None;
        while self.frames_seen < total {
            if stop.load(Ordering::Relaxed) {
                return Err(MeasureError::Cancelled);
            }
            self.stats.ticks += 1;

            let written = self.pump_output(sink);
            let before = self.retained();
            let read = self.pump_input(source, total)?;
            log::trace!("tick {}: wrote {}, read {}", self.stats.ticks, written, read);

            let after = self.retained();
            if after != before {
                progress(after);
            }
            if after == 0 {
                underrun_base = None;
            } else if underrun_base.is_none() {
                underrun_base = Some(sink.underruns());
            }

            if read > 0 {
                last_input = Instant::now();
            } else {
                let waited = last_input.elapsed();
                if waited > self.config.stall_timeout {
                    return Err(MeasureError::Stalled { waited });
                }
            }

            if written == 0 && read == 0 && self.frames_seen < total {
                self.stats.idle_ticks += 1;
                thread::sleep(self.config.poll_interval);
            }
        }

        self.stats.underruns =
            underrun_base.map_or(0, |base| sink.underruns().saturating_sub(base));
        log::debug!("Playback stopped at tone table offset {}", self.tone.cursor());
        Ok(Capture {
            samples: self.block,
            stats: self.stats,
        })
    }

    fn pump_output<K: FrameSink>(&mut self, sink: &mut K) -> usize {
        if self.pending == 0 {
            self.tone.fill(&mut self.out_buf);
            self.pending = self.out_buf.len();
            self.out_offset = 0;
        }

        let chunk = &self.out_buf[self.out_offset..self.out_offset + self.pending];
        match sink.write_frames(chunk) {
            Ok(n) => {
                let n = n.min(self.pending);
                self.pending -= n;
                self.out_offset += n;
                self.stats.frames_written += n as u64;
                n
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => 0,
            Err(e) => {
                self.stats.write_errors += 1;
                log::warn!("Playback error: {}", e);
                0
            }
        }
    }

    fn pump_input<S: FrameSource>(
        &mut self,
        source: &mut S,
        total: usize,
    ) -> Result<usize, MeasureError> {
        let n = match source.read_frames(&mut self.in_buf) {
            Ok(n) => n.min(self.in_buf.len()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => 0,
            Err(e) => {
                match as_overrun(&e) {
                    Some(overrun) => self.restart_retention(overrun.dropped)?,
                    None => {
                        self.stats.read_errors += 1;
                        log::warn!("Capture error: {}", e);
                    }
                }
                0
            }
        };

        let settle = self.config.settle_frames;
        for frame in &self.in_buf[..n] {
            if self.frames_seen >= settle && self.frames_seen < total {
                self.block[self.frames_seen - settle] = frame.channel(self.config.channel) as f64;
            }
            self.frames_seen += 1;
        }
        self.stats.frames_read += n as u64;
        Ok(n)
    }

    /// Capture lost frames: samples retained so far do not continue into
    /// the ones that follow, so retention starts again after the settle
    /// window.
    fn restart_retention(&mut self, dropped: u64) -> Result<(), MeasureError> {
        self.stats.overruns += 1;
        let discarded = self.retained();
        if discarded == 0 {
            log::debug!("Capture overrun before retention ({} frames dropped)", dropped);
            return Ok(());
        }
        if self.stats.restarts >= self.config.max_restarts {
            return Err(MeasureError::Overrun {
                restarts: self.stats.restarts,
            });
        }
        self.stats.restarts += 1;
        log::warn!(
            "Capture overrun ({} frames dropped), discarding {} retained samples",
            dropped,
            discarded
        );
        self.frames_seen = self.config.settle_frames;
        Ok(())
    }
}
