//! Typed errors for the telemetry and reconstruction stages.
//!
//! Per-record and per-frame problems never surface here; they are recovered
//! where they happen. These errors are file-scoped outcomes the batch driver
//! reports and moves past.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to read telemetry out of an input file.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// The byte source could not be opened at all.
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A read failed after the file was opened.
    #[error("I/O error while reading telemetry: {0}")]
    Io(#[from] io::Error),
}

/// Reasons the dense trajectory could not be built.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReconstructError {
    #[error("no telemetry fixes to reconstruct from")]
    Empty,

    #[error("expected duration is zero")]
    ZeroDuration,

    #[error("too few fixes: {found} found, at least {required} required")]
    TooFewFixes { found: usize, required: usize },

    #[error("coverage {coverage_pct:.1}% is below the required {required_pct:.1}%")]
    InsufficientCoverage { coverage_pct: f64, required_pct: f64 },
}
