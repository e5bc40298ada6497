//! Error taxonomy for the engine, following the startup/runtime/IO/cancellation
//! split described for this command's error handling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

/// A cooperative cancellation flag, polled by the estimate driver between
/// rows of its outer loop. Cloning shares the same underlying flag, so a
/// caller can hold one clone to signal cancellation (e.g. from a signal
/// handler) while passing another into the driver.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Top-level error type returned by fallible entry points.
///
/// Per-patch numerical failures (SVD non-convergence, non-finite estimator
/// output) are *not* represented here: they are recovered locally by the
/// estimate driver (NaN / zero written to the relevant outputs) and are only
/// visible as a summary count at the end of a run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// ndim != 4, size(3) <= 1, or a mismatched header between the input
    /// image and a mask/VST image. Fatal at startup.
    #[error("input shape error: {0}")]
    InputShape(String),

    /// Incompatible option combinations (e.g. demodulation requested on
    /// real-valued data, `-estimator import` without `-noise_in`).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Failure creating or writing an output file. Fatal; any partially
    /// written outputs must be discarded by the caller.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The scan was cancelled cooperatively before completion. Partial
    /// outputs must be discarded.
    #[error("scan cancelled")]
    Cancelled,

    #[error("(de)serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
