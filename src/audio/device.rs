//! cpal-backed playback and capture streams.
//!
//! cpal delivers audio through callbacks on its own thread. Each stream owns a
//! bounded [`FrameQueue`] shared with its callback; the synchronizer side only
//! ever `try_lock`s it, which keeps every read and write non-blocking.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, TryLockError};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};

use crate::error::MeasureError;

use super::stream::{overrun, would_block, Frame, FrameSink, FrameSource};
use super::sync::CHUNK_FRAMES;

/// Playback queue depth. Small, so the tone reaching the DAC stays close to
/// what the synchronizer just generated.
const PLAYBACK_QUEUE_FRAMES: usize = 4 * CHUNK_FRAMES;
/// Capture queue depth, roughly a second at 48 kHz.
const CAPTURE_QUEUE_FRAMES: usize = 48 * CHUNK_FRAMES;

pub struct FrameQueue {
    frames: Mutex<VecDeque<Frame>>,
    capacity: usize,
    /// Output callback found the queue empty (playback) or full (capture).
    xruns: AtomicU64,
    reported_xruns: AtomicU64,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            xruns: AtomicU64::new(0),
            reported_xruns: AtomicU64::new(0),
        }
    }

    fn try_frames(&self) -> io::Result<std::sync::MutexGuard<'_, VecDeque<Frame>>> {
        match self.frames.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::WouldBlock) => Err(would_block()),
            Err(TryLockError::Poisoned(_)) => Err(io::Error::other("audio queue poisoned")),
        }
    }

    fn lock_frames(&self) -> std::sync::MutexGuard<'_, VecDeque<Frame>> {
        self.frames.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Producer side of playback: queue what fits.
    pub fn push(&self, frames: &[Frame]) -> io::Result<usize> {
        let mut queue = self.try_frames()?;
        let space = self.capacity.saturating_sub(queue.len());
        if space == 0 {
            return Err(would_block());
        }
        let n = space.min(frames.len());
        queue.extend(frames[..n].iter().copied());
        Ok(n)
    }

    /// Consumer side of capture: drain what has arrived. A capture overrun
    /// since the last call is surfaced once as an
    /// [`Overrun`](super::stream::Overrun) error and the frames queued before
    /// the gap are dropped with it, so frames returned afterwards are
    /// contiguous.
    pub fn pop(&self, buf: &mut [Frame]) -> io::Result<usize> {
        let mut queue = self.try_frames()?;
        // the callback counts drops under the lock, so no frame queued now
        // was recorded after the gap
        let xruns = self.xruns.load(Ordering::Relaxed);
        let reported = self.reported_xruns.swap(xruns, Ordering::Relaxed);
        if xruns > reported {
            let stale = queue.len() as u64;
            queue.clear();
            return Err(overrun(xruns - reported + stale));
        }

        if queue.is_empty() {
            return Err(would_block());
        }
        let n = buf.len().min(queue.len());
        for (slot, frame) in buf.iter_mut().zip(queue.drain(..n)) {
            *slot = frame;
        }
        Ok(n)
    }

    /// Called from the output callback.
    fn render<T: SizedSample + FromSample<i16>>(&self, data: &mut [T], channels: usize) {
        let mut queue = self.lock_frames();
        for out in data.chunks_mut(channels) {
            let frame = match queue.pop_front() {
                Some(frame) => frame,
                None => {
                    self.xruns.fetch_add(1, Ordering::Relaxed);
                    Frame::default()
                }
            };
            for (ch, sample) in out.iter_mut().enumerate() {
                let value = if ch == 1 { frame.right } else { frame.left };
                *sample = T::from_sample(value);
            }
        }
    }

    /// Called from the input callback. Mono devices are widened to stereo.
    fn record<T>(&self, data: &[T], channels: usize)
    where
        T: SizedSample,
        i16: FromSample<T>,
    {
        let mut queue = self.lock_frames();
        for chunk in data.chunks(channels) {
            if queue.len() >= self.capacity {
                self.xruns.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            let left = i16::from_sample(chunk[0]);
            let right = chunk.get(1).map(|&s| i16::from_sample(s)).unwrap_or(left);
            queue.push_back(Frame { left, right });
        }
    }

    pub fn xruns(&self) -> u64 {
        self.xruns.load(Ordering::Relaxed)
    }
}

#[derive(Clone, Copy, Debug)]
enum Direction {
    Playback,
    Capture,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Playback => "playback",
            Direction::Capture => "capture",
        }
    }
}

/// A started cpal stream plus the queue its callback services. Dropping it
/// stops and closes the device.
pub struct AudioStream {
    stream: cpal::Stream,
    queue: Arc<FrameQueue>,
    direction: Direction,
    pub device_name: String,
    pub sample_rate: u32,
}

pub type PlaybackStream = AudioStream;
pub type CaptureStream = AudioStream;

impl FrameSink for AudioStream {
    fn write_frames(&mut self, frames: &[Frame]) -> io::Result<usize> {
        self.queue.push(frames)
    }

    fn underruns(&self) -> u64 {
        self.queue.xruns()
    }
}

impl FrameSource for AudioStream {
    fn read_frames(&mut self, buf: &mut [Frame]) -> io::Result<usize> {
        self.queue.pop(buf)
    }
}

impl Drop for AudioStream {
    fn drop(&mut self) {
        if let Err(e) = self.stream.pause() {
            log::debug!("Failed to pause {} stream: {}", self.direction.label(), e);
        }
        let xruns = self.queue.xruns();
        if xruns > 0 {
            let what = match self.direction {
                Direction::Playback => "underrun",
                Direction::Capture => "overrun",
            };
            log::debug!("{} stream saw {} {} frames", self.direction.label(), xruns, what);
        }
        log::info!("Audio {} device '{}' released", self.direction.label(), self.device_name);
    }
}

pub fn open_playback(hint: Option<&str>, sample_rate: u32) -> Result<PlaybackStream, MeasureError> {
    open(Direction::Playback, hint, sample_rate)
}

pub fn open_capture(hint: Option<&str>, sample_rate: u32) -> Result<CaptureStream, MeasureError> {
    open(Direction::Capture, hint, sample_rate)
}

fn setup_err(direction: Direction, what: &str, err: impl std::fmt::Display) -> MeasureError {
    MeasureError::Setup(format!("{} device: {}: {}", direction.label(), what, err))
}

fn find_device(
    host: &cpal::Host,
    direction: Direction,
    hint: Option<&str>,
) -> Result<cpal::Device, MeasureError> {
    let Some(hint) = hint else {
        let device = match direction {
            Direction::Playback => host.default_output_device(),
            Direction::Capture => host.default_input_device(),
        };
        return device.ok_or_else(|| {
            MeasureError::Setup(format!("no default {} device found", direction.label()))
        });
    };

    let devices: Vec<cpal::Device> = match direction {
        Direction::Playback => host
            .output_devices()
            .map_err(|e| setup_err(direction, "cannot enumerate", e))?
            .collect(),
        Direction::Capture => host
            .input_devices()
            .map_err(|e| setup_err(direction, "cannot enumerate", e))?
            .collect(),
    };
    devices
        .into_iter()
        .find(|d| d.name().map(|n| n.contains(hint)).unwrap_or(false))
        .ok_or_else(|| {
            MeasureError::Setup(format!("no {} device matching '{}'", direction.label(), hint))
        })
}

fn format_rank(format: SampleFormat) -> Option<u8> {
    match format {
        SampleFormat::I16 => Some(0),
        SampleFormat::F32 => Some(1),
        _ => None,
    }
}

fn channel_rank(channels: u16) -> u8 {
    match channels {
        2 => 0,
        c if c > 2 => 1,
        _ => 2,
    }
}

/// Pick the supported configuration covering `sample_rate`, preferring 16-bit
/// samples over float and stereo over other layouts.
pub fn choose_config(
    ranges: impl IntoIterator<Item = cpal::SupportedStreamConfigRange>,
    sample_rate: u32,
) -> Option<cpal::SupportedStreamConfig> {
    ranges
        .into_iter()
        .filter(|r| format_rank(r.sample_format()).is_some())
        .filter(|r| r.min_sample_rate().0 <= sample_rate && sample_rate <= r.max_sample_rate().0)
        .min_by_key(|r| (format_rank(r.sample_format()), channel_rank(r.channels())))
        .map(|r| r.with_sample_rate(cpal::SampleRate(sample_rate)))
}

fn open(
    direction: Direction,
    hint: Option<&str>,
    sample_rate: u32,
) -> Result<AudioStream, MeasureError> {
    let host = cpal::default_host();
    let device = find_device(&host, direction, hint)?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!("Opening {} device '{}'", direction.label(), device_name);

    let ranges: Vec<cpal::SupportedStreamConfigRange> = match direction {
        Direction::Playback => device
            .supported_output_configs()
            .map_err(|e| setup_err(direction, "cannot query configurations", e))?
            .collect(),
        Direction::Capture => device
            .supported_input_configs()
            .map_err(|e| setup_err(direction, "cannot query configurations", e))?
            .collect(),
    };

    let supported = match choose_config(ranges, sample_rate) {
        Some(config) => config,
        None => {
            log::warn!(
                "{} device has no 16-bit/float configuration at {} Hz, using its default",
                direction.label(),
                sample_rate
            );
            match direction {
                Direction::Playback => device.default_output_config(),
                Direction::Capture => device.default_input_config(),
            }
            .map_err(|e| setup_err(direction, "no default configuration", e))?
        }
    };

    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    if config.sample_rate.0 < sample_rate {
        log::warn!(
            "{} sample rate does not match requested rate ({} < {})",
            direction.label(),
            config.sample_rate.0,
            sample_rate
        );
    }

    let capacity = match direction {
        Direction::Playback => PLAYBACK_QUEUE_FRAMES,
        Direction::Capture => CAPTURE_QUEUE_FRAMES,
    };
    let queue = Arc::new(FrameQueue::new(capacity));

    let stream = match (direction, sample_format) {
        (Direction::Playback, SampleFormat::I16) => build_output::<i16>(&device, &config, &queue),
        (Direction::Playback, SampleFormat::F32) => build_output::<f32>(&device, &config, &queue),
        (Direction::Capture, SampleFormat::I16) => build_input::<i16>(&device, &config, &queue),
        (Direction::Capture, SampleFormat::F32) => build_input::<f32>(&device, &config, &queue),
        (_, other) => {
            return Err(MeasureError::Setup(format!(
                "{} device: unsupported sample format {:?}",
                direction.label(),
                other
            )))
        }
    }
    .map_err(|e| setup_err(direction, "cannot build stream", e))?;

    stream
        .play()
        .map_err(|e| setup_err(direction, "cannot start stream", e))?;

    log::info!(
        "Audio {} stream ready: {} Hz, {} channels, {:?}",
        direction.label(),
        config.sample_rate.0,
        config.channels,
        sample_format
    );

    Ok(AudioStream {
        stream,
        queue,
        direction,
        device_name,
        sample_rate: config.sample_rate.0,
    })
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: &Arc<FrameQueue>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<i16>,
{
    let channels = config.channels as usize;
    let queue = Arc::clone(queue);
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| queue.render(data, channels),
        |err| log::error!("Playback stream error: {}", err),
        None,
    )
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: &Arc<FrameQueue>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let channels = config.channels as usize;
    let queue = Arc::clone(queue);
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| queue.record(data, channels),
        |err| log::error!("Capture stream error: {}", err),
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::stream::as_overrun;
    use crate::audio::sync::{StreamSynchronizer, SyncConfig};
    use crate::audio::tone::{ToneGenerator, ToneSettings, DEFAULT_AMPLITUDE};
    use cpal::{SampleRate, SupportedBufferSize, SupportedStreamConfigRange};
    use std::sync::atomic::AtomicBool;

    fn range(
        channels: u16,
        min: u32,
        max: u32,
        format: SampleFormat,
    ) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            channels,
            SampleRate(min),
            SampleRate(max),
            SupportedBufferSize::Unknown,
            format,
        )
    }

    #[test]
    fn prefers_stereo_i16_at_requested_rate() {
        let ranges = vec![
            range(2, 8000, 192000, SampleFormat::F32),
            range(1, 8000, 192000, SampleFormat::I16),
            range(2, 8000, 192000, SampleFormat::I16),
            range(2, 8000, 192000, SampleFormat::I32),
        ];
        let chosen = choose_config(ranges, 48000).unwrap();
        assert_eq!(chosen.sample_format(), SampleFormat::I16);
        assert_eq!(chosen.channels(), 2);
        assert_eq!(chosen.sample_rate().0, 48000);
    }

    #[test]
    fn skips_ranges_not_covering_rate() {
        let ranges = vec![
            range(2, 8000, 44100, SampleFormat::I16),
            range(2, 44100, 96000, SampleFormat::F32),
        ];
        let chosen = choose_config(ranges, 48000).unwrap();
        assert_eq!(chosen.sample_format(), SampleFormat::F32);
        assert!(choose_config(vec![range(2, 8000, 44100, SampleFormat::I16)], 48000).is_none());
    }

    #[test]
    fn push_takes_only_what_fits() {
        let queue = FrameQueue::new(10);
        let frames = vec![Frame { left: 1, right: 1 }; 8];
        assert_eq!(queue.push(&frames).unwrap(), 8);
        assert_eq!(queue.push(&frames).unwrap(), 2);
        let err = queue.push(&frames).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn render_plays_queue_then_silence() {
        let queue = FrameQueue::new(16);
        queue
            .push(&[Frame { left: 100, right: -100 }, Frame { left: 200, right: -200 }])
            .unwrap();
        let mut out = vec![0i16; 6];
        queue.render(&mut out, 2);
        assert_eq!(out, vec![100, -100, 200, -200, 0, 0]);
        assert_eq!(queue.xruns(), 1);
    }

    #[test]
    fn record_then_pop_preserves_order() {
        let queue = FrameQueue::new(16);
        queue.record(&[1i16, 2, 3, 4, 5, 6], 2);
        let mut buf = vec![Frame::default(); 2];
        assert_eq!(queue.pop(&mut buf).unwrap(), 2);
        assert_eq!(buf[0], Frame { left: 1, right: 2 });
        assert_eq!(buf[1], Frame { left: 3, right: 4 });
        assert_eq!(queue.pop(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], Frame { left: 5, right: 6 });
        assert_eq!(queue.pop(&mut buf).unwrap_err().kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn mono_capture_is_widened() {
        let queue = FrameQueue::new(4);
        queue.record(&[0.5f32, -0.5], 1);
        let mut buf = vec![Frame::default(); 4];
        assert_eq!(queue.pop(&mut buf).unwrap(), 2);
        assert_eq!(buf[0].left, buf[0].right);
        assert!(buf[0].left > 16000);
        assert!(buf[1].left < -16000);
    }

    #[test]
    fn capture_overrun_is_reported_once_and_drops_stale_frames() {
        let queue = FrameQueue::new(2);
        queue.record(&[1i16, 2, 3], 1);
        let mut buf = vec![Frame::default(); 4];
        let err = queue.pop(&mut buf).unwrap_err();
        // one frame lost to the full queue, two queued before the gap
        assert_eq!(as_overrun(&err).map(|o| o.dropped), Some(3));
        assert_eq!(queue.pop(&mut buf).unwrap_err().kind(), io::ErrorKind::WouldBlock);

        queue.record(&[4i16, 5], 1);
        assert_eq!(queue.pop(&mut buf).unwrap(), 2);
        assert_eq!(buf[0].left, 4);
        assert_eq!(buf[1].left, 5);
    }

    /// Capture queue fed by a scripted callback before every poll.
    struct CallbackSource {
        queue: FrameQueue,
        batches: Vec<std::ops::Range<i16>>,
        calls: usize,
    }

    impl FrameSource for CallbackSource {
        fn read_frames(&mut self, buf: &mut [Frame]) -> io::Result<usize> {
            if let Some(batch) = self.batches.get(self.calls).cloned() {
                let data: Vec<i16> = batch.collect();
                self.queue.record(&data, 1);
            }
            self.calls += 1;
            self.queue.pop(buf)
        }
    }

    struct OpenSink;

    impl FrameSink for OpenSink {
        fn write_frames(&mut self, frames: &[Frame]) -> io::Result<usize> {
            Ok(frames.len())
        }
    }

    fn sync_config(settle: usize, requested: usize) -> SyncConfig {
        let mut config = SyncConfig::new(settle, requested);
        config.chunk_frames = 16;
        config.poll_interval = std::time::Duration::from_micros(10);
        config
    }

    fn tone() -> ToneGenerator {
        ToneGenerator::new(&ToneSettings {
            frequency: 1000,
            sample_rate: 48000,
            amplitude: DEFAULT_AMPLITUDE,
        })
        .unwrap()
    }

    #[test]
    fn overrun_mid_capture_restarts_retention() {
        // 0..4 retained, then 8..12 overflow the queue and 4..8 go stale
        let mut source = CallbackSource {
            queue: FrameQueue::new(4),
            batches: vec![0..4, 4..12, 12..16, 16..20],
            calls: 0,
        };
        let stop = AtomicBool::new(false);

        let capture = StreamSynchronizer::new(tone(), sync_config(0, 8))
            .unwrap()
            .run(&mut OpenSink, &mut source, &stop, |_| {})
            .unwrap();

        let expected: Vec<f64> = (12..20).map(f64::from).collect();
        assert_eq!(capture.samples, expected);
        assert_eq!(capture.stats.overruns, 1);
        assert_eq!(capture.stats.restarts, 1);
        assert_eq!(capture.stats.read_errors, 0);
    }

    #[test]
    fn overrun_before_retention_loses_nothing_kept() {
        let mut source = CallbackSource {
            queue: FrameQueue::new(4),
            batches: vec![0..8, 8..12, 12..16],
            calls: 0,
        };
        let stop = AtomicBool::new(false);

        let capture = StreamSynchronizer::new(tone(), sync_config(0, 8))
            .unwrap()
            .run(&mut OpenSink, &mut source, &stop, |_| {})
            .unwrap();

        let expected: Vec<f64> = (8..16).map(f64::from).collect();
        assert_eq!(capture.samples, expected);
        assert_eq!(capture.stats.overruns, 1);
        assert_eq!(capture.stats.restarts, 0);
    }
}
