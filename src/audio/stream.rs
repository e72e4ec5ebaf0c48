//! Capability boundary between the synchronizer and the audio hardware.
//!
//! Both directions follow the std non-blocking I/O convention: a call that
//! cannot make progress right now fails with [`io::ErrorKind::WouldBlock`],
//! any other error is a device fault.

use std::io;

use thiserror::Error;

/// One interleaved stereo frame of 16-bit samples.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Frame {
    pub left: i16,
    pub right: i16,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    #[default]
    Left,
    Right,
}

impl Frame {
    pub fn channel(&self, channel: Channel) -> i16 {
        match channel {
            Channel::Left => self.left,
            Channel::Right => self.right,
        }
    }
}

/// Playback side: accepts generated frames.
pub trait FrameSink {
    /// Queue as many of `frames` as fit without blocking and return how many
    /// were taken.
    fn write_frames(&mut self, frames: &[Frame]) -> io::Result<usize>;

    /// Frames of silence the device has played so far for lack of queued
    /// frames.
    fn underruns(&self) -> u64 {
        0
    }
}

/// Capture side: yields recorded frames.
pub trait FrameSource {
    /// Copy already-captured frames into `buf` without blocking and return how
    /// many were copied.
    fn read_frames(&mut self, buf: &mut [Frame]) -> io::Result<usize>;
}

pub fn would_block() -> io::Error {
    io::ErrorKind::WouldBlock.into()
}

/// Capture frames were lost before this read. Frames read afterwards do not
/// continue the ones read before.
#[derive(Debug, Error)]
#[error("capture overrun, {dropped} frames dropped")]
pub struct Overrun {
    pub dropped: u64,
}

pub fn overrun(dropped: u64) -> io::Error {
    io::Error::other(Overrun { dropped })
}

pub fn as_overrun(err: &io::Error) -> Option<&Overrun> {
    err.get_ref()?.downcast_ref()
}
