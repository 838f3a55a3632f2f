use std::path::PathBuf;

use thiserror::Error;

/// Call-level faults. Data-quality problems never surface here; they are
/// reported through `ParseOutcome` and `ValidationResult` instead.
#[derive(Debug, Error)]
pub enum ParseFault {
    #[error("target hour '{0}' is not a valid HH:MM label")]
    InvalidTargetHour(String),

    #[error("invalid matcher for field '{field}': {source}")]
    InvalidMatcher {
        field: String,
        #[source]
        source: regex::Error,
    },

    #[error("matcher for field '{0}' has no named 'value' capture group")]
    MissingValueGroup(String),

    #[error("field '{0}' is configured more than once")]
    DuplicateField(String),

    #[error("expected range for field '{field}' is inverted ({min} > {max})")]
    InvertedRange { field: String, min: f64, max: f64 },

    #[error("scoring weights must sum to 1.0, got {0:.4}")]
    WeightSum(f64),

    #[error("invalid configuration document: {0}")]
    InvalidConfig(String),

    #[error("failed to read configuration {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to compile built-in pattern '{name}': {source}")]
    BuiltinPattern {
        name: &'static str,
        #[source]
        source: regex::Error,
    },
}
