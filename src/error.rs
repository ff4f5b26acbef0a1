//! Error types for configuration, generation and export.

use thiserror::Error;

/// A configuration value that would break generation if accepted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// Basis field sizes divide the query distance, so they must be positive.
    #[error("basis field size must be positive and finite, got {0}")]
    NonPositiveSize(f64),

    /// Separation only has an effect when the test distance is the smaller one.
    #[error("dtest ({dtest}) must be smaller than dsep ({dsep})")]
    TestDistanceTooLarge { dtest: f64, dsep: f64 },

    /// Integration cannot advance with a zero or negative step.
    #[error("dstep must be positive and finite, got {0}")]
    NonPositiveStep(f64),

    /// A tuning knob outside its finite range.
    #[error("{name} is out of range, got {value}")]
    InvalidTuning { name: &'static str, value: f64 },

    /// A direction that cannot be normalised.
    #[error("{0} direction must be non-zero and finite")]
    ZeroDirection(&'static str),
}

/// Errors that stop a generation run.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A stage kept reporting work past its step limit.
    #[error("{stage} stage did not finish within {limit} steps")]
    Stalled { stage: &'static str, limit: usize },
}

/// Errors raised while building the export archive.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// `get_stl` was called while a previous session is still running.
    #[error("an export is already in progress")]
    Busy,

    /// The generator went idle without resolving the pending archive.
    #[error("export session ended before producing an archive")]
    Abandoned,
}
