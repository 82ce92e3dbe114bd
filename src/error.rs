// MOBATCH ERROR TYPES
// REQUEST ERRORS ARE RECOVERABLE: THEY REJECT ONE REQUEST, NEVER THE PROCESS.
// DATASET AND CONFIG ERRORS ARE FATAL AT STARTUP.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    /// `cores` is neither <= 4 nor == 8.
    #[error("unsupported core topology: {cores} cores")]
    UnsupportedTopology { cores: f64 },
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("dataset i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("dataset has no header row")]
    MissingHeader,
    #[error("dataset schema mismatch (missing: {missing:?}, unexpected: {unexpected:?})")]
    SchemaMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("batch bounds inverted: min {min} > max {max}")]
    InvertedBounds { min: u64, max: u64 },
    #[error("batch bound {0} is not a multiple of 8")]
    UnalignedBound(u64),
    #[error("slo must be finite and positive, got {0}")]
    InvalidSlo(f64),
}
