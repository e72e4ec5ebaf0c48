use rayon::prelude::*;

use crate::error::{try_alloc, MeasureError};

/// Largest magnitude of a 16-bit sample; 0 dB on the spectrum.
pub const FULL_SCALE: f64 = 32768.0;

/// Single-bin correlation result. `sine` and `cosine` are amplitudes of the
/// bin's sinusoid, `dc` is the block mean.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Components {
    pub sine: f64,
    pub cosine: f64,
    pub dc: f64,
}

impl Components {
    pub fn amplitude(&self) -> f64 {
        self.sine.hypot(self.cosine)
    }
}

/// One period of sin/cos sampled at `N` points, shared by every bin of an
/// `N`-sample block. Bin `b` walks the table `b` entries per sample.
#[derive(Default)]
pub struct CorrelationTables {
    sin: Vec<f64>,
    cos: Vec<f64>,
}

impl CorrelationTables {
    pub fn new(len: usize) -> Result<Self, MeasureError> {
        let mut sin: Vec<f64> = try_alloc("sine table", len)?;
        let mut cos: Vec<f64> = try_alloc("cosine table", len)?;
        for i in 0..len {
            let phase = i as f64 / len as f64 * 2.0 * std::f64::consts::PI;
            sin[i] = phase.sin();
            cos[i] = phase.cos();
        }
        Ok(Self { sin, cos })
    }

    pub fn len(&self) -> usize {
        self.sin.len()
    }

    /// Correlate `block` against bin `bin`. The block must be as long as the
    /// tables.
    pub fn correlate(&self, block: &[f64], bin: usize) -> Components {
        let n = self.len();
        debug_assert_eq!(block.len(), n);
        if n == 0 {
            return Components::default();
        }

        let step = bin % n;
        let mut index = 0;
        let (mut s, mut c, mut t) = (0.0, 0.0, 0.0);
        for &x in block {
            s += x * self.sin[index];
            c += x * self.cos[index];
            t += x;
            index += step;
            if index >= n {
                index -= n;
            }
        }

        let half = n as f64 / 2.0;
        Components {
            sine: s / half,
            cosine: c / half,
            dc: t / n as f64,
        }
    }
}

/// Run-scoped correlator. Holds the tables for the most recent block length
/// and replaces them when a block of another length arrives.
#[derive(Default)]
pub struct Correlator {
    tables: CorrelationTables,
    builds: usize,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tables(&mut self, len: usize) -> Result<&CorrelationTables, MeasureError> {
        if self.tables.len() != len {
            // drop the old tables before allocating the new ones
            self.tables = CorrelationTables::default();
            log::debug!("Building correlation tables for {} samples", len);
            self.tables = CorrelationTables::new(len)?;
            self.builds += 1;
        }
        Ok(&self.tables)
    }

    pub fn correlate(&mut self, block: &[f64], bin: usize) -> Result<Components, MeasureError> {
        Ok(self.tables(block.len())?.correlate(block, bin))
    }

    /// Magnitude in dB relative to `full_scale` for bins `0..N/2`. Bin 0 holds
    /// the DC term and is reported as `-inf` so it never wins a peak search.
    pub fn spectrum(&mut self, block: &[f64], full_scale: f64) -> Result<Vec<f64>, MeasureError> {
        let half = block.len() / 2;
        let mut magnitudes: Vec<f64> = try_alloc("spectrum", half)?;
        let tables = self.tables(block.len())?;

        magnitudes
            .par_iter_mut()
            .enumerate()
            .skip(1)
            .for_each(|(bin, m)| {
                let amplitude = tables.correlate(block, bin).amplitude();
                *m = 20.0 * (amplitude / full_scale).log10();
            });
        if let Some(dc) = magnitudes.first_mut() {
            *dc = f64::NEG_INFINITY;
        }
        Ok(magnitudes)
    }

    /// Number of times tables have been (re)built.
    pub fn builds(&self) -> usize {
        self.builds
    }
}
