use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid identifier: {0:?}")]
    InvalidId(String),

    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("unknown category: {0}")]
    UnknownCategory(String),

    #[error("unknown keep-in-touch cadence: {0}")]
    UnknownCadence(String),

    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("score {0} out of range")]
    ScoreOutOfRange(i64),

    #[error("value does not fit field {field}: {reason}")]
    Mismatch { field: String, reason: String },
}
