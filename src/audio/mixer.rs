use anyhow::{Context, Result};
use serde::Deserialize;
use std::process::{Command, Stdio};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LevelChannel {
    Playback,
    Capture,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MixerConfig {
    #[serde(default = "default_card")]
    pub card: String,
    #[serde(default = "default_playback_control")]
    pub playback_control: String,
    #[serde(default = "default_capture_control")]
    pub capture_control: String,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            card: default_card(),
            playback_control: default_playback_control(),
            capture_control: default_capture_control(),
        }
    }
}

fn default_card() -> String { "default".into() }
fn default_playback_control() -> String { "Master".into() }
fn default_capture_control() -> String { "Capture".into() }

/// Volume side-channel of the audio device.
pub trait LevelControl {
    fn set_level(&mut self, channel: LevelChannel, percent: u8) -> Result<()>;
}

/// Sets ALSA mixer controls through the `amixer` utility. A plain `N%`
/// argument maps linearly onto the control's raw range.
pub struct Amixer {
    config: MixerConfig,
}

impl Amixer {
    pub fn new(config: MixerConfig) -> Self {
        Self { config }
    }

    fn args(&self, channel: LevelChannel, percent: u8) -> Vec<String> {
        let control = match channel {
            LevelChannel::Playback => &self.config.playback_control,
            LevelChannel::Capture => &self.config.capture_control,
        };
        vec![
            "-D".into(),
            self.config.card.clone(),
            "-q".into(),
            "sset".into(),
            control.clone(),
            format!("{}%", percent.min(100)),
        ]
    }
}

impl LevelControl for Amixer {
    fn set_level(&mut self, channel: LevelChannel, percent: u8) -> Result<()> {
        let args = self.args(channel, percent);
        let output = Command::new("amixer")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .context("Failed to run amixer. Is alsa-utils installed?")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("amixer {} failed: {}", args.join(" "), stderr.trim());
        }
        Ok(())
    }
}

/// Apply the requested levels. Failures are logged and otherwise ignored.
pub fn apply_levels<C: LevelControl>(control: &mut C, playback: Option<u8>, capture: Option<u8>) {
    let requests = [
        (LevelChannel::Playback, playback),
        (LevelChannel::Capture, capture),
    ];
    for (channel, level) in requests {
        let Some(percent) = level else { continue };
        match control.set_level(channel, percent) {
            Ok(()) => log::info!("Set {:?} level to {}%", channel, percent),
            Err(err) => log::warn!("Unable to set {:?} level: {:#}", channel, err),
        }
    }
}
