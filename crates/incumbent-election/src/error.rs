//! Election error types.

use thiserror::Error;

/// Errors surfaced by the election loop and its collaborators.
///
/// Store faults and conflicts never appear here while the loop is
/// running; they only shape its timing. What does escape is fatal.
#[derive(Debug, Error)]
pub enum ElectionError {
    #[error("invalid election config: {0}")]
    Config(String),

    #[error("leadership invariant violated: {0}")]
    InvariantViolation(String),
}

pub type ElectionResult<T> = Result<T, ElectionError>;
