mod analysis;
mod audio;
mod cli;
mod config;
mod error;
mod render;
mod report;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::AtomicBool;

use audio::device;
use audio::mixer::{self, Amixer};
use audio::sync::{StreamSynchronizer, SyncConfig};
use audio::tone::{ToneGenerator, ToneSettings};
use cli::Cli;
use config::{Config, Settings};
use error::MeasureError;
use render::chart::ChartRenderer;
use render::text::TextOverlay;

const LABEL_FONT_SIZE: f32 = 28.0;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    if let Err(err) = run(&cli) {
        log::error!("{:#}", err);
        let code = err
            .downcast_ref::<MeasureError>()
            .map_or(1, MeasureError::exit_code);
        std::process::exit(code);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let cfg = match cli.config {
        Some(ref path) => {
            let cfg = config::load_config(path)?;
            log::info!("Loaded config from {}", path.display());
            cfg
        }
        None => Config::default(),
    };
    let settings = Settings::resolve(cli, cfg)?;

    log::info!("thdn-meter - loop-back THD+N measurement");
    log::info!(
        "Tone: {} Hz at {:.0} LSB, {} Hz requested",
        settings.tone.frequency,
        settings.tone.amplitude,
        settings.tone.sample_rate
    );
    log::info!("Capture: {} points, {} ms settle", settings.points, settings.settle_ms);

    // 1. Play the tone and capture the loop-back
    let (samples, sample_rate) = capture(&settings)?;

    // 2. Analyze
    let analysis = analysis::analyze(&samples, sample_rate)?;
    drop(samples);

    // 3. Report
    if settings.json {
        println!("{}", report::json(&analysis).context("Failed to encode metrics")?);
    } else {
        println!();
        println!("{}", report::text(&analysis.metrics));
    }

    // 4. Chart
    if let Some(ref output) = settings.output {
        let text = TextOverlay::load(settings.font.as_deref(), LABEL_FONT_SIZE);
        ChartRenderer::new(text).render_to_file(
            &analysis.spectrum,
            &report::caption(&analysis.metrics),
            output,
        )?;
    }

    Ok(())
}

/// Open both devices, set levels, run the synchronizer. Devices are released
/// when this returns, on success or failure.
fn capture(settings: &Settings) -> Result<(Vec<f64>, u32)> {
    let requested_rate = settings.tone.sample_rate;
    let mut playback = device::open_playback(settings.playback_device.as_deref(), requested_rate)?;
    let mut capture = device::open_capture(settings.capture_device.as_deref(), requested_rate)?;

    if settings.playback_level.is_some() || settings.capture_level.is_some() {
        let mut control = Amixer::new(settings.mixer.clone());
        mixer::apply_levels(&mut control, settings.playback_level, settings.capture_level);
    }

    let tone = ToneGenerator::new(&ToneSettings {
        sample_rate: playback.sample_rate,
        ..settings.tone
    })?;

    let settle = settings.settle_frames(capture.sample_rate);
    let mut sync_config = SyncConfig::new(settle, settings.points);
    sync_config.channel = settings.channel;
    sync_config.stall_timeout = settings.stall_timeout;
    let sync = StreamSynchronizer::new(tone, sync_config)?;

    let pb = ProgressBar::new(settings.points as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} samples")?
            .progress_chars("=>-"),
    );

    // Nothing raises this yet; it is the per-tick cancellation hook.
    let stop = AtomicBool::new(false);
    let result = sync.run(&mut playback, &mut capture, &stop, |n| pb.set_position(n as u64));
    match result {
        Ok(captured) => {
            pb.finish_with_message("Capture complete");
            let stats = &captured.stats;
            log::info!(
                "Captured {} samples at {} Hz ({} ticks, {} idle, {} frames written)",
                captured.samples.len(),
                capture.sample_rate,
                stats.ticks,
                stats.idle_ticks,
                stats.frames_written
            );
            if stats.write_errors > 0 || stats.read_errors > 0 {
                log::warn!(
                    "{} playback and {} capture errors were retried",
                    stats.write_errors,
                    stats.read_errors
                );
            }
            if stats.overruns > 0 {
                log::warn!(
                    "{} capture overruns, retention restarted {} times",
                    stats.overruns,
                    stats.restarts
                );
            }
            if stats.underruns > 0 {
                log::warn!(
                    "Playback ran dry for {} frames while capturing; the tone had gaps",
                    stats.underruns
                );
            }
            Ok((captured.samples, capture.sample_rate))
        }
        Err(err) => {
            pb.abandon();
            Err(err.into())
        }
    }
}
