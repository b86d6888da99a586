//! Core error types for lockstep.

use std::fmt;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Invalid peer name
    InvalidName {
        /// Why the name was rejected
        reason: String,
    },

    /// Not found
    NotFound {
        /// Kind of entity
        kind: String,
        /// Entity identifier
        id: String,
    },

    /// Internal error (for unexpected errors)
    Internal {
        /// Error message
        message: String,
    },
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidName { reason } => write!(f, "Invalid peer name: {}", reason),
            Self::NotFound { kind, id } => write!(f, "{} not found: {}", kind, id),
            Self::Internal { message } => write!(f, "Internal error: {}", message),
        }
    }
}

impl std::error::Error for CoreError {}
