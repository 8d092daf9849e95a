//! Validation errors.
//!
//! Raised before any expensive processing starts. Messages are shown to the
//! requester verbatim, so they are phrased for humans.

use thiserror::Error;

/// Result type for validation checks.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Input rejected by a size, duration, name or parameter limit.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("File too large ({actual_mb:.1}MB > {max_mb:.1}MB)")]
    FileTooLarge { actual_mb: f64, max_mb: f64 },

    #[error("Video too long ({actual:.1}s > {max:.0}s)")]
    TooLong { actual: f64, max: f64 },

    #[error("Video has no duration")]
    EmptyDuration,

    #[error("Maximum clip length must be positive (got {0})")]
    InvalidClipLength(f64),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Please provide a valid URL starting with http:// or https://")]
    InvalidUrl,

    #[error("File does not exist: {0}")]
    MissingFile(String),
}

impl ValidationError {
    /// Create an invalid name error.
    pub fn invalid_name(message: impl Into<String>) -> Self {
        Self::InvalidName(message.into())
    }
}
