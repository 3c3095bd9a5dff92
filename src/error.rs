//! Error types for bucket-mirror

use thiserror::Error;

/// Result type alias for mirror operations
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Main error type for bucket-mirror
#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Listing error: {0}")]
    Listing(String),

    #[error("Cloud storage error: {0}")]
    CloudStorage(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MirrorError {
    /// Check if error is retryable on the next poll
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MirrorError::Listing(_) | MirrorError::CloudStorage(_) | MirrorError::Io(_)
        )
    }
}
