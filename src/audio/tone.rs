use crate::error::{try_alloc, MeasureError};

use super::stream::Frame;

/// Default test tone amplitude: 3 * 8192 LSB, roughly -2.5 dBFS.
pub const DEFAULT_AMPLITUDE: f64 = 24576.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ToneSettings {
    pub frequency: u32,
    pub sample_rate: u32,
    pub amplitude: f64,
}

impl ToneSettings {
    pub fn validate(&self) -> Result<(), MeasureError> {
        if self.sample_rate == 0 {
            return Err(MeasureError::Configuration("sample rate must be positive".into()));
        }
        if self.frequency == 0 || self.frequency as u64 * 2 >= self.sample_rate as u64 {
            return Err(MeasureError::Configuration(format!(
                "tone frequency {} Hz must be above 0 and below Nyquist ({} Hz)",
                self.frequency,
                self.sample_rate / 2
            )));
        }
        if !self.amplitude.is_finite() || self.amplitude <= 0.0 {
            return Err(MeasureError::Configuration(format!(
                "tone amplitude {} must be a positive number",
                self.amplitude
            )));
        }
        if self.amplitude.round() > i16::MAX as f64 {
            return Err(MeasureError::Configuration(format!(
                "tone amplitude {} exceeds the 16-bit sample range (max {})",
                self.amplitude,
                i16::MAX
            )));
        }
        Ok(())
    }
}

/// One second of a 1 Hz sine at the configured amplitude, quantized to i16.
///
/// Each slot is sampled at its centre, `sin(2π(i + ½)/rate)`, so the table
/// never holds an exact zero crossing.
pub struct ToneTable {
    samples: Vec<i16>,
}

impl ToneTable {
    pub fn new(sample_rate: u32, amplitude: f64) -> Result<Self, MeasureError> {
        let len = sample_rate as usize;
        let mut samples: Vec<i16> = try_alloc("tone table", len)?;
        let denom = 2.0 * sample_rate as f64;
        for (i, slot) in samples.iter_mut().enumerate() {
            let phase = (2 * i + 1) as f64 / denom * 2.0 * std::f64::consts::PI;
            // f64::round rounds half away from zero
            let value = (amplitude * phase.sin()).round();
            if value > i16::MAX as f64 || value < i16::MIN as f64 {
                return Err(MeasureError::Configuration(format!(
                    "tone sample {} out of 16-bit range",
                    value
                )));
            }
            *slot = value as i16;
        }
        Ok(Self { samples })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn get(&self, index: usize) -> i16 {
        self.samples[index % self.samples.len()]
    }
}

/// Phase-continuous tone source. The write cursor steps `frequency` table
/// slots per output frame and wraps at the table length, so the output is
/// exactly `frequency` cycles per second for integer frequencies, and the
/// phase realigns at the start of every second of output.
pub struct ToneGenerator {
    table: ToneTable,
    step: usize,
    cursor: usize,
}

impl ToneGenerator {
    pub fn new(settings: &ToneSettings) -> Result<Self, MeasureError> {
        settings.validate()?;
        let table = ToneTable::new(settings.sample_rate, settings.amplitude)?;
        log::debug!(
            "Tone table: {} samples, {} Hz step, amplitude {:.0}",
            table.len(),
            settings.frequency,
            settings.amplitude
        );
        Ok(Self {
            table,
            step: settings.frequency as usize,
            cursor: 0,
        })
    }

    pub fn next_sample(&mut self) -> i16 {
        let value = self.table.get(self.cursor);
        self.cursor += self.step;
        if self.cursor >= self.table.len() {
            self.cursor -= self.table.len();
        }
        value
    }

    /// Fill `frames` with the next tone samples, same value on both channels.
    pub fn fill(&mut self, frames: &mut [Frame]) {
        for frame in frames.iter_mut() {
            let s = self.next_sample();
            *frame = Frame { left: s, right: s };
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }
}
