//! Unified error types
//!
//! This module provides a centralized error hierarchy that all components
//! can use, enabling consistent error handling across the codebase.

use crate::storage::StorageError;

/// Main error type for search-core operations
#[derive(Debug, thiserror::Error)]
pub enum KnnError {
    /// Storage layer errors (tables, object storage)
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Index operation errors (HNSW)
    #[error("Index error: {0}")]
    Index(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Vector dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Invalid input data
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation not supported by this collection variant
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Engine used before bootstrap completed
    #[error("Index engine not ready: {0}")]
    NotReady(String),

    /// Invocation of a physical compute instance failed
    #[error("Invocation error: {0}")]
    Invocation(String),

    /// Every candidate timed out or failed and the retry budget is spent
    #[error("No active instances (retries: {retries}, fallbacks: {fallbacks})")]
    NoActiveInstances { retries: u32, fallbacks: u32 },

    /// Deploy / destroy failures
    #[error("Deployment error: {0}")]
    Deploy(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Deserialization errors
    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

/// Result type alias for search-core operations
pub type Result<T> = std::result::Result<T, KnnError>;

impl KnnError {
    /// Create an index error
    pub fn index(msg: impl Into<String>) -> Self {
        Self::Index(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a dimension mismatch error
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch { expected, actual }
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create an unsupported operation error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create an invocation error
    pub fn invocation(msg: impl Into<String>) -> Self {
        Self::Invocation(msg.into())
    }

    /// Create a deployment error
    pub fn deploy(msg: impl Into<String>) -> Self {
        Self::Deploy(msg.into())
    }

    /// Create a deserialization error
    pub fn deserialization(msg: impl Into<String>) -> Self {
        Self::Deserialization(msg.into())
    }

    /// Bad input from the caller: surfaced as a 400 and never retried
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            KnnError::DimensionMismatch { .. } | KnnError::InvalidInput(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KnnError::dimension_mismatch(384, 128);
        assert_eq!(err.to_string(), "Dimension mismatch: expected 384, got 128");

        let err = KnnError::NoActiveInstances {
            retries: 5,
            fallbacks: 12,
        };
        assert_eq!(
            err.to_string(),
            "No active instances (retries: 5, fallbacks: 12)"
        );
    }

    #[test]
    fn test_error_constructors() {
        let err = KnnError::index("HNSW build failed");
        assert!(matches!(err, KnnError::Index(_)));

        let err = KnnError::config("Invalid M parameter");
        assert!(matches!(err, KnnError::Config(_)));
    }

    #[test]
    fn test_client_error_classification() {
        assert!(KnnError::dimension_mismatch(3, 4).is_client_error());
        assert!(KnnError::invalid_input("k must be positive").is_client_error());

        let storage = KnnError::from(StorageError::Backend("boom".into()));
        assert!(!storage.is_client_error());
        assert!(!KnnError::invocation("timeout").is_client_error());
    }
}
