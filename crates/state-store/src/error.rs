use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when persisting or recovering saga state.
#[derive(Debug, Error)]
pub enum StateStoreError {
    /// The state directory could not be created or read.
    #[error("failed to access state directory {dir}: {source}")]
    Directory {
        dir: PathBuf,
        source: std::io::Error,
    },

    /// A file operation failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A snapshot could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for state store operations.
pub type Result<T> = std::result::Result<T, StateStoreError>;
