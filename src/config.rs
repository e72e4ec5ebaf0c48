use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::mixer::MixerConfig;
use crate::audio::stream::Channel;
use crate::audio::tone::{ToneSettings, DEFAULT_AMPLITUDE};
use crate::cli::Cli;
use crate::error::MeasureError;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub tone: ToneConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub mixer: MixerConfig,
    #[serde(default)]
    pub chart: ChartConfig,
}

#[derive(Debug, Deserialize)]
pub struct ToneConfig {
    #[serde(default = "default_frequency")]
    pub frequency: u32,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_amplitude")]
    pub amplitude: f64,
    #[serde(default = "default_playback_level")]
    pub level: u8,
    #[serde(default)]
    pub device: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_points")]
    pub points: usize,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u32,
    #[serde(default)]
    pub channel: Channel,
    #[serde(default = "default_capture_level")]
    pub level: u8,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default = "default_stall_timeout_ms")]
    pub stall_timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct ChartConfig {
    #[serde(default = "default_output")]
    pub output: PathBuf,
    #[serde(default)]
    pub font: Option<PathBuf>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Default for ToneConfig {
    fn default() -> Self {
        Self {
            frequency: default_frequency(),
            sample_rate: default_sample_rate(),
            amplitude: default_amplitude(),
            level: default_playback_level(),
            device: None,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            points: default_points(),
            settle_ms: default_settle_ms(),
            channel: Channel::default(),
            level: default_capture_level(),
            device: None,
            stall_timeout_ms: default_stall_timeout_ms(),
        }
    }
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            font: None,
            enabled: default_enabled(),
        }
    }
}

fn default_frequency() -> u32 { 1000 }
fn default_sample_rate() -> u32 { 48000 }
fn default_amplitude() -> f64 { DEFAULT_AMPLITUDE }
fn default_playback_level() -> u8 { 100 }
fn default_points() -> usize { 12000 }
fn default_settle_ms() -> u32 { 100 }
fn default_capture_level() -> u8 { 30 }
fn default_stall_timeout_ms() -> u64 { 5000 }
fn default_output() -> PathBuf { "graph.png".into() }
fn default_enabled() -> bool { true }

pub fn load_config(path: &Path) -> Result<Config, MeasureError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        MeasureError::Configuration(format!("cannot read {}: {}", path.display(), e))
    })?;
    parse_config(&content)
        .map_err(|e| MeasureError::Configuration(format!("{}: {}", path.display(), e)))
}

pub fn parse_config(content: &str) -> Result<Config, toml::de::Error> {
    toml::from_str(content)
}

/// Effective settings for one run: command line over config file over
/// built-in defaults.
#[derive(Clone, Debug)]
pub struct Settings {
    pub tone: ToneSettings,
    pub points: usize,
    pub settle_ms: u32,
    pub channel: Channel,
    pub stall_timeout: Duration,
    pub playback_device: Option<String>,
    pub capture_device: Option<String>,
    /// `None` leaves the mixer control untouched.
    pub playback_level: Option<u8>,
    pub capture_level: Option<u8>,
    pub mixer: MixerConfig,
    /// `None` skips the chart.
    pub output: Option<PathBuf>,
    pub font: Option<PathBuf>,
    pub json: bool,
}

impl Settings {
    pub fn resolve(cli: &Cli, cfg: Config) -> Result<Self, MeasureError> {
        let use_mixer = !cli.no_mixer;
        let settings = Settings {
            tone: ToneSettings {
                frequency: cli.frequency.unwrap_or(cfg.tone.frequency),
                sample_rate: cli.sample_rate.unwrap_or(cfg.tone.sample_rate),
                amplitude: cli.amplitude.unwrap_or(cfg.tone.amplitude),
            },
            points: cli.points.unwrap_or(cfg.capture.points),
            settle_ms: cli.settle_ms.unwrap_or(cfg.capture.settle_ms),
            channel: cli.channel.unwrap_or(cfg.capture.channel),
            stall_timeout: Duration::from_millis(
                cli.stall_timeout_ms.unwrap_or(cfg.capture.stall_timeout_ms),
            ),
            playback_device: cli.playback_device.clone().or(cfg.tone.device),
            capture_device: cli.capture_device.clone().or(cfg.capture.device),
            playback_level: use_mixer.then(|| cli.playback_level.unwrap_or(cfg.tone.level)),
            capture_level: use_mixer.then(|| cli.capture_level.unwrap_or(cfg.capture.level)),
            mixer: cfg.mixer,
            output: (!cli.no_chart && cfg.chart.enabled)
                .then(|| cli.output.clone().unwrap_or(cfg.chart.output)),
            font: cli.font.clone().or(cfg.chart.font),
            json: cli.json,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), MeasureError> {
        self.tone.validate()?;
        if self.points < 2 {
            return Err(MeasureError::Configuration(format!(
                "need at least 2 capture points, got {}",
                self.points
            )));
        }
        for level in [self.playback_level, self.capture_level].into_iter().flatten() {
            if level > 100 {
                return Err(MeasureError::Configuration(format!(
                    "mixer level {}% is above 100%",
                    level
                )));
            }
        }
        Ok(())
    }

    /// Frames to discard at the start of capture for a device running at
    /// `sample_rate`.
    pub fn settle_frames(&self, sample_rate: u32) -> usize {
        (sample_rate as u64 * self.settle_ms as u64 / 1000) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["thdn-meter"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_match_reference_setup() {
        let s = Settings::resolve(&cli(&[]), Config::default()).unwrap();
        assert_eq!(s.tone.frequency, 1000);
        assert_eq!(s.tone.sample_rate, 48000);
        assert_eq!(s.tone.amplitude, 24576.0);
        assert_eq!(s.points, 12000);
        assert_eq!(s.playback_level, Some(100));
        assert_eq!(s.capture_level, Some(30));
        assert_eq!(s.settle_frames(48000), 4800);
        assert_eq!(s.output, Some(PathBuf::from("graph.png")));
        assert_eq!(s.channel, Channel::Left);
    }

    #[test]
    fn parses_sections() {
        let cfg = parse_config(
            r#"
            [tone]
            frequency = 997
            level = 90

            [capture]
            points = 24000
            channel = "right"
            device = "USB"

            [mixer]
            card = "hw:1"

            [chart]
            output = "spectrum.ppm"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.tone.frequency, 997);
        assert_eq!(cfg.tone.sample_rate, 48000);
        assert_eq!(cfg.capture.channel, Channel::Right);
        assert_eq!(cfg.mixer.card, "hw:1");
        assert_eq!(cfg.mixer.capture_control, "Capture");
        assert_eq!(cfg.chart.output, PathBuf::from("spectrum.ppm"));
    }

    #[test]
    fn command_line_overrides_file() {
        let cfg =
            parse_config("[tone]\nfrequency = 500\nlevel = 70\n[capture]\nlevel = 40\n").unwrap();
        let s = Settings::resolve(&cli(&["90", "--frequency", "2000"]), cfg).unwrap();
        assert_eq!(s.tone.frequency, 2000);
        assert_eq!(s.playback_level, Some(90));
        assert_eq!(s.capture_level, Some(40));
    }

    #[test]
    fn switches_disable_mixer_and_chart() {
        let s = Settings::resolve(&cli(&["--no-mixer", "--no-chart"]), Config::default()).unwrap();
        assert_eq!(s.playback_level, None);
        assert_eq!(s.capture_level, None);
        assert_eq!(s.output, None);
    }

    #[test]
    fn invalid_values_are_configuration_errors() {
        let err =
            Settings::resolve(&cli(&["--amplitude", "40000"]), Config::default()).unwrap_err();
        assert!(matches!(err, MeasureError::Configuration(_)));

        let err = Settings::resolve(&cli(&["-n", "1"]), Config::default()).unwrap_err();
        assert!(matches!(err, MeasureError::Configuration(_)));

        let cfg = parse_config("[capture]\nlevel = 150\n").unwrap();
        assert!(Settings::resolve(&cli(&[]), cfg).is_err());
    }

    #[test]
    fn unknown_sections_are_rejected() {
        assert!(parse_config("[bogus]\nx = 1\n").is_err());
    }

    #[test]
    fn unreadable_file_is_configuration_error() {
        let err = load_config(Path::new("/nonexistent/thdn.toml")).unwrap_err();
        assert!(matches!(err, MeasureError::Configuration(_)));
    }
}
