use serde::Serialize;
use std::f64::consts::PI;

use crate::error::MeasureError;

use super::correlator::{Components, Correlator};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Metrics {
    pub peak_bin: usize,
    pub peak_hz: f64,
    pub signal_amplitude: f64,
    pub dc_offset: f64,
    /// Mean absolute deviation of the block from the fitted tone. Used as the
    /// THD+N amplitude; note it is not an RMS value.
    pub residual: f64,
    pub thdn_percent: f64,
    pub snr_db: f64,
}

impl Metrics {
    pub fn new(peak_bin: usize, peak_hz: f64, components: Components, residual: f64) -> Self {
        let signal = components.amplitude();
        let (thdn_percent, snr_db) = if signal == 0.0 {
            (f64::INFINITY, f64::NEG_INFINITY)
        } else if residual == 0.0 {
            (0.0, f64::INFINITY)
        } else {
            let ratio = signal / residual;
            (residual / signal * 100.0, 10.0 * (ratio * ratio).log10())
        };
        Self {
            peak_bin,
            peak_hz,
            signal_amplitude: signal,
            dc_offset: components.dc,
            residual,
            thdn_percent,
            snr_db,
        }
    }
}

/// Index of the largest magnitude. Ties go to the lowest index.
pub fn peak_bin(spectrum: &[f64]) -> usize {
    let mut best = 0;
    for (i, &m) in spectrum.iter().enumerate() {
        if m > spectrum[best] {
            best = i;
        }
    }
    best
}

/// Subtract the fitted sinusoid plus DC at `bin` and return the mean absolute
/// deviation of what is left.
pub fn remove_tone(block: &[f64], bin: usize, fit: &Components) -> f64 {
    let n = block.len();
    if n == 0 {
        return 0.0;
    }
    let total: f64 = block
        .iter()
        .enumerate()
        .map(|(i, &x)| {
            // reduce i·bin modulo n first to keep the phase argument small
            let phase = ((i * bin) % n) as f64 / n as f64 * 2.0 * PI;
            let fitted = fit.sine * phase.sin() + fit.cosine * phase.cos() + fit.dc;
            (x - fitted).abs()
        })
        .sum();
    total / n as f64
}

/// Locate the fundamental in `spectrum`, re-fit it on `block` and derive the
/// distortion metrics.
pub fn measure(
    block: &[f64],
    spectrum: &[f64],
    correlator: &mut Correlator,
    sample_rate: u32,
) -> Result<Metrics, MeasureError> {
    let bin = peak_bin(spectrum);
    let mut fit = correlator.correlate(block, bin)?;
    if !spectrum.get(bin).is_some_and(|m| m.is_finite()) {
        // nothing above -inf: keep only the mean
        fit = Components { dc: fit.dc, ..Components::default() };
    }
    let residual = remove_tone(block, bin, &fit);
    let peak_hz = if block.is_empty() {
        0.0
    } else {
        bin as f64 * sample_rate as f64 / block.len() as f64
    };
    log::debug!(
        "Peak bin {} ({:.2} Hz): sine {:.3}, cosine {:.3}, dc {:.3}, residual {:.4}",
        bin,
        peak_hz,
        fit.sine,
        fit.cosine,
        fit.dc,
        residual
    );

    let metrics = Metrics::new(bin, peak_hz, fit, residual);
    if metrics.signal_amplitude == 0.0 {
        log::warn!("No tone found in the captured signal");
    }
    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::correlator::FULL_SCALE;

    fn tone(len: usize, bin: usize, amplitude: f64, phase: f64, dc: f64) -> Vec<f64> {
        (0..len)
            .map(|i| amplitude * (2.0 * PI * bin as f64 * i as f64 / len as f64 + phase).sin() + dc)
            .collect()
    }

    #[test]
    fn peak_is_dominant_bin() {
        let mut spectrum: Vec<f64> = (0..200).map(|i| -100.0 - (i % 17) as f64).collect();
        spectrum[73] = -3.0;
        assert_eq!(peak_bin(&spectrum), 73);

        // unrelated bins moving around does not change the answer
        spectrum[10] = -20.0;
        spectrum[150] = -4.0;
        assert_eq!(peak_bin(&spectrum), 73);
    }

    #[test]
    fn peak_ties_resolve_to_first() {
        let spectrum = vec![f64::NEG_INFINITY, -10.0, -5.0, -7.0, -5.0];
        assert_eq!(peak_bin(&spectrum), 2);
        let flat = vec![f64::NEG_INFINITY; 8];
        assert_eq!(peak_bin(&flat), 0);
    }

    #[test]
    fn pure_tone_leaves_no_residual() {
        let block = tone(4800, 100, 20000.0, 0.7, 12.0);
        let mut correlator = Correlator::new();
        let spectrum = correlator.spectrum(&block, FULL_SCALE).unwrap();
        let m = measure(&block, &spectrum, &mut correlator, 48000).unwrap();

        assert_eq!(m.peak_bin, 100);
        assert!((m.peak_hz - 1000.0).abs() < 1e-9);
        assert!((m.signal_amplitude - 20000.0).abs() < 1e-6);
        assert!((m.dc_offset - 12.0).abs() < 1e-9);
        assert!(m.residual < 1e-6);
        assert!(m.thdn_percent < 1e-8);
    }

    #[test]
    fn residual_is_mean_absolute_deviation() {
        // +4 on every fourth sample: mean absolute deviation 1, RMS would be 2
        let mut block = tone(1000, 20, 5000.0, 0.0, 0.0);
        let fit = Correlator::new().correlate(&block, 20).unwrap();
        let clean = remove_tone(&block, 20, &fit);
        assert!(clean < 1e-9);

        for (i, x) in block.iter_mut().enumerate() {
            if i % 4 == 0 {
                *x += 4.0;
            }
        }
        // fit without re-correlating: deviations are 4 on a quarter of samples
        let mad = remove_tone(&block, 20, &fit);
        assert!((mad - 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_residual_reports_infinite_snr() {
        let c = Components {
            sine: 3.0,
            cosine: 4.0,
            dc: 0.0,
        };
        let m = Metrics::new(5, 50.0, c, 0.0);
        assert_eq!(m.signal_amplitude, 5.0);
        assert_eq!(m.thdn_percent, 0.0);
        assert_eq!(m.snr_db, f64::INFINITY);
    }

    #[test]
    fn zero_signal_is_reported_not_fatal() {
        let m = Metrics::new(0, 0.0, Components::default(), 1.5);
        assert_eq!(m.thdn_percent, f64::INFINITY);
        assert_eq!(m.snr_db, f64::NEG_INFINITY);

        let silent = vec![0.0; 64];
        let mut correlator = Correlator::new();
        let spectrum = correlator.spectrum(&silent, FULL_SCALE).unwrap();
        let m = measure(&silent, &spectrum, &mut correlator, 48000).unwrap();
        assert_eq!(m.signal_amplitude, 0.0);
        assert_eq!(m.residual, 0.0);
    }

    #[test]
    fn snr_and_thdn_agree() {
        let c = Components {
            sine: 1000.0,
            cosine: 0.0,
            dc: 0.0,
        };
        let m = Metrics::new(1, 1.0, c, 1.0);
        assert!((m.thdn_percent - 0.1).abs() < 1e-12);
        assert!((m.snr_db - 60.0).abs() < 1e-9);
    }
}
