//! Core error types for pipeforge.

use std::fmt;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Text that does not name an id
    InvalidId {
        /// The rejected text
        value: String,
        /// Why it was rejected
        reason: String,
    },
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidId { value, reason } => write!(f, "Invalid id {:?}: {}", value, reason),
        }
    }
}

impl std::error::Error for CoreError {}
