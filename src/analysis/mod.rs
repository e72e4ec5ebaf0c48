pub mod correlator;
pub mod metrics;

use crate::error::MeasureError;

use correlator::{Correlator, FULL_SCALE};
use metrics::Metrics;

pub struct Analysis {
    pub sample_rate: u32,
    pub block_len: usize,
    /// dB relative to full scale, one entry per bin in `0..N/2`.
    pub spectrum: Vec<f64>,
    pub metrics: Metrics,
}

/// Full sweep of a captured block: spectrum, fundamental, residual.
pub fn analyze(block: &[f64], sample_rate: u32) -> Result<Analysis, MeasureError> {
    if block.len() < 2 {
        return Err(MeasureError::Configuration(format!(
            "need at least 2 samples to analyze, got {}",
            block.len()
        )));
    }

    log::info!("Analysing {} captured samples...", block.len());
    let mut correlator = Correlator::new();

    log::info!("Pass 1: spectrum over {} bins", block.len() / 2);
    let spectrum = correlator.spectrum(block, FULL_SCALE)?;

    log::info!("Pass 2: fundamental fit and tone removal");
    let metrics = metrics::measure(block, &spectrum, &mut correlator, sample_rate)?;
    log::debug!("Correlation tables built {} time(s)", correlator.builds());

    Ok(Analysis {
        sample_rate,
        block_len: block.len(),
        spectrum,
        metrics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::f64::consts::PI;

    #[test]
    fn loopback_tone_with_lsb_noise() {
        let rate = 48000;
        let len = 12000;
        let amplitude = 8192.0 * 3.0;
        let mut rng = StdRng::seed_from_u64(0x7d4e);
        let block: Vec<f64> = (0..len)
            .map(|i| {
                let t = i as f64 / rate as f64;
                let s = (amplitude * (2.0 * PI * 1000.0 * t).sin()).round();
                s + rng.gen_range(-1.0..=1.0)
            })
            .collect();

        let analysis = analyze(&block, rate).unwrap();
        let m = &analysis.metrics;
        assert_eq!(analysis.spectrum.len(), 6000);
        assert_eq!(m.peak_bin, 250);
        assert!((m.peak_hz - 1000.0).abs() < 1e-9);
        assert!(m.thdn_percent < 1.0, "thd+n {}", m.thdn_percent);
        assert!(m.snr_db > 40.0, "snr {}", m.snr_db);
        assert!((m.signal_amplitude - amplitude).abs() < 1.0);
    }

    #[test]
    fn peak_hz_uses_block_resolution() {
        let rate = 44100;
        let len = 4410;
        let block: Vec<f64> = (0..len)
            .map(|i| 1000.0 * (2.0 * PI * 30.0 * i as f64 / len as f64).cos())
            .collect();
        let analysis = analyze(&block, rate).unwrap();
        assert_eq!(analysis.metrics.peak_bin, 30);
        assert!((analysis.metrics.peak_hz - 300.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_tiny_blocks() {
        assert!(matches!(
            analyze(&[1.0], 48000),
            Err(MeasureError::Configuration(_))
        ));
    }
}
