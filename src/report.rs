use serde::Serialize;

use crate::analysis::metrics::Metrics;
use crate::analysis::Analysis;

#[derive(Serialize)]
struct JsonReport<'a> {
    sample_rate: u32,
    block_len: usize,
    #[serde(flatten)]
    metrics: &'a Metrics,
}

/// Chart caption, e.g. `thd+n  0.0123%, peak 1000.00 Hz`.
pub fn caption(metrics: &Metrics) -> String {
    format!(
        "thd+n {:7.4}%, peak {:4.2} Hz",
        metrics.thdn_percent, metrics.peak_hz
    )
}

pub fn text(metrics: &Metrics) -> String {
    format!(
        "signal = {:10.2}\n\
         dc     = {:10.2}\n\
         thd+n  = {:10.2}  ({:7.3}%)\n\
         s:n    = {:10.2} dB\n\
         peak   = {:10.2} Hz (bin {})",
        metrics.signal_amplitude,
        metrics.dc_offset,
        metrics.residual,
        metrics.thdn_percent,
        metrics.snr_db,
        metrics.peak_hz,
        metrics.peak_bin
    )
}

/// Non-finite values (infinite SNR for a perfect fit) serialize as `null`.
pub fn json(analysis: &Analysis) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&JsonReport {
        sample_rate: analysis.sample_rate,
        block_len: analysis.block_len,
        metrics: &analysis.metrics,
    })
}
