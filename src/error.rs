//! Error types for resource operations.

use thiserror::Error;

/// Main error type for resource operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Item already exists: {0}")]
    AlreadyExists(String),

    #[error("Concurrent update detected")]
    ConcurrentUpdate,

    #[error("Unable to generate a unique id after {attempts} attempts")]
    IdExhausted { attempts: usize },

    #[error("Invalid field mask: {0}")]
    InvalidMask(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Expected value does not match current value")]
    ExpectedValueMismatch,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Failed to spawn subscription thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Coarse classification of a [`StoreError`], independent of any RPC status enum.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    Aborted,
    InvalidArgument,
    FailedPrecondition,
    Internal,
}

impl StoreError {
    /// The kind of failure this error represents.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            StoreError::ConcurrentUpdate | StoreError::IdExhausted { .. } => ErrorKind::Aborted,
            StoreError::InvalidMask(_) | StoreError::InvalidArgument(_) => {
                ErrorKind::InvalidArgument
            }
            StoreError::ExpectedValueMismatch => ErrorKind::FailedPrecondition,
            StoreError::Serialization(_) | StoreError::Spawn(_) => ErrorKind::Internal,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result type for resource operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(StoreError::NotFound("a".into()).kind(), ErrorKind::NotFound);
        assert_eq!(StoreError::ConcurrentUpdate.kind(), ErrorKind::Aborted);
        assert_eq!(
            StoreError::IdExhausted { attempts: 10 }.kind(),
            ErrorKind::Aborted
        );
        assert_eq!(
            StoreError::InvalidMask("x".into()).kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            StoreError::ExpectedValueMismatch.kind(),
            ErrorKind::FailedPrecondition
        );
    }
}
