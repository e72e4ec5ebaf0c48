use clap::Parser;
use std::path::PathBuf;

use crate::audio::stream::Channel;

#[derive(Parser, Debug)]
#[command(name = "thdn-meter", about = "Loop-back THD+N meter for audio codecs")]
pub struct Cli {
    /// Playback mixer level in percent [default: 100]
    #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
    pub playback_level: Option<u8>,

    /// Capture mixer level in percent [default: 30]
    #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
    pub capture_level: Option<u8>,

    /// TOML settings file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Spectrum chart output (PNG or PPM by extension) [default: graph.png]
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Test tone frequency in Hz [default: 1000]
    #[arg(short, long)]
    pub frequency: Option<u32>,

    /// Requested sample rate in Hz [default: 48000]
    #[arg(long)]
    pub sample_rate: Option<u32>,

    /// Number of captured samples to analyze [default: 12000]
    #[arg(short = 'n', long)]
    pub points: Option<usize>,

    /// Capture discarded while the path settles, in ms [default: 100]
    #[arg(long)]
    pub settle_ms: Option<u32>,

    /// Test tone peak amplitude in 16-bit LSB [default: 24576]
    #[arg(long)]
    pub amplitude: Option<f64>,

    /// Playback device (substring of its name)
    #[arg(long)]
    pub playback_device: Option<String>,

    /// Capture device (substring of its name)
    #[arg(long)]
    pub capture_device: Option<String>,

    /// Capture channel to analyze [default: left]
    #[arg(long, value_enum)]
    pub channel: Option<Channel>,

    /// TrueType font for chart labels
    #[arg(long)]
    pub font: Option<PathBuf>,

    /// Abort when no capture frames arrive for this long, in ms [default: 5000]
    #[arg(long)]
    pub stall_timeout_ms: Option<u64>,

    /// Leave mixer levels untouched
    #[arg(long)]
    pub no_mixer: bool,

    /// Skip writing the spectrum chart
    #[arg(long)]
    pub no_chart: bool,

    /// Print metrics as JSON
    #[arg(long)]
    pub json: bool,
}
