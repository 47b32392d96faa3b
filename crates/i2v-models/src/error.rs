//! Input validation errors.

use thiserror::Error;

/// Result type for input validation.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Errors raised while validating a job's input.
///
/// The `Display` output is returned verbatim to the caller in the job
/// response, so messages carry no prefix.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Missing '{0}' in input")]
    MissingField(&'static str),

    #[error("Invalid '{field}' in input: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl ValidationError {
    pub fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}
