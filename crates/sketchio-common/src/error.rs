//! Error types for SketchIO
//!
//! This module defines the common error types used throughout the system.

use crate::types::SketchIdError;
use std::path::PathBuf;
use thiserror::Error;

/// Common result type for SketchIO operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for SketchIO
#[derive(Debug, Error)]
pub enum Error {
    // Storage errors
    #[error("failed to open {}: {source}", path.display())]
    OpenFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("disk I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("write-back of page at offset {offset} failed: {source}")]
    WriteBack {
        offset: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("sketch not found: {0}")]
    NotFound(String),

    // Sketch errors
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("invalid sketch id: {0}")]
    InvalidSketchId(#[from] SketchIdError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // Internal errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an unsupported operation error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a serialization error
    pub fn serialization(msg: impl ToString) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Create a deserialization error
    pub fn deserialization(msg: impl ToString) -> Self {
        Self::Deserialization(msg.to_string())
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            Self::OpenFailure { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Check if the sketch rejected the operation as unsupported
    #[must_use]
    pub const fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }

    /// Check if this error originated in the backing medium
    #[must_use]
    pub const fn is_io(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::WriteBack { .. } | Self::OpenFailure { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_not_found() {
        assert!(Error::NotFound("s".into()).is_not_found());
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(Error::Io(io).is_not_found());
        assert!(!Error::unsupported("remove").is_not_found());
    }

    #[test]
    fn test_error_classification() {
        assert!(Error::unsupported("remove").is_unsupported());
        let err = Error::WriteBack {
            offset: 4,
            source: std::io::Error::other("disk gone"),
        };
        assert!(err.is_io());
        assert!(!Error::serialization("bad").is_io());
    }

    #[test]
    fn test_error_display() {
        let err = Error::OpenFailure {
            path: PathBuf::from("/nope/x"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(err.to_string(), "failed to open /nope/x: denied");
    }
}
