use std::time::Duration;

use thiserror::Error;

/// Conditions that abort a measurement run. No metrics are reported once one
/// of these has been raised.
#[derive(Debug, Error)]
pub enum MeasureError {
    #[error("audio device setup failed: {0}")]
    Setup(String),

    #[error("out of memory allocating {what} ({len} elements)")]
    Allocation { what: &'static str, len: usize },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("capture stalled: no frames received for {waited:?}")]
    Stalled { waited: Duration },

    #[error("capture kept overrunning: retention restarted {restarts} times")]
    Overrun { restarts: u32 },

    #[error("measurement cancelled")]
    Cancelled,
}

impl MeasureError {
    pub fn exit_code(&self) -> i32 {
        match self {
            MeasureError::Configuration(_) => 2,
            MeasureError::Setup(_) => 3,
            MeasureError::Allocation { .. } => 4,
            MeasureError::Stalled { .. } => 5,
            MeasureError::Overrun { .. } => 6,
            MeasureError::Cancelled => 130,
        }
    }
}

/// Allocate a zeroed buffer, reporting failure instead of aborting.
pub fn try_alloc<T: Clone + Default>(
    what: &'static str,
    len: usize,
) -> Result<Vec<T>, MeasureError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| MeasureError::Allocation { what, len })?;
    buf.resize(len, T::default());
    Ok(buf)
}
