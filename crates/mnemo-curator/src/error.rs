//! Error types for the Mnemo curator

use thiserror::Error;

/// Main error type for curation operations
#[derive(Error, Debug)]
pub enum CuratorError {
    /// Candidate rejected before any record was created
    #[error("Validation error: {0}")]
    Validation(String),

    /// Storage backend errors (LanceDB, retries exhausted, etc.)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Embedding generation errors
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Eviction sweep errors
    #[error("Sweep error: {0}")]
    Sweep(String),

    /// Operation abandoned because its cancellation token fired
    #[error("Operation cancelled")]
    Cancelled,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CuratorError {
    /// True when the error originated in the storage backend.
    ///
    /// Callers use this to decide whether re-submitting the whole candidate
    /// is worthwhile.
    pub fn is_storage_fault(&self) -> bool {
        matches!(self, CuratorError::Storage(_))
    }
}

impl From<serde_json::Error> for CuratorError {
    fn from(e: serde_json::Error) -> Self {
        CuratorError::Serialization(e.to_string())
    }
}

/// Result type alias for curator operations
pub type Result<T> = std::result::Result<T, CuratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_fault_classification() {
        assert!(CuratorError::Storage("disk full".to_string()).is_storage_fault());
        assert!(!CuratorError::Validation("empty".to_string()).is_storage_fault());
        assert!(!CuratorError::Embedding("timeout".to_string()).is_storage_fault());
    }

    #[test]
    fn test_error_display() {
        let err = CuratorError::Validation("content is empty".to_string());
        assert_eq!(err.to_string(), "Validation error: content is empty");
        assert_eq!(CuratorError::Cancelled.to_string(), "Operation cancelled");
    }
}
