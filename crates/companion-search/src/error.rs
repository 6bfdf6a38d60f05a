//! Error types for companion-search

use thiserror::Error;

/// Errors that can occur in indexing and retrieval operations
#[derive(Error, Debug)]
pub enum SearchError {
    /// Qdrant client error
    #[error("qdrant error: {0}")]
    Qdrant(String),

    /// Connection error
    #[error("connection failed: {0}")]
    Connection(String),

    /// Embedding error
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Vector dimension mismatch against an existing collection
    #[error("vector dimension mismatch: collection has {actual}, embedder produces {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Segmentation was called with invalid arguments
    #[error("segmentation error: {0}")]
    Segmentation(String),

    /// SiYuan kernel error
    #[error(transparent)]
    Notes(#[from] companion_notes::NotesError),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error (cursor file)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<qdrant_client::QdrantError> for SearchError {
    fn from(err: qdrant_client::QdrantError) -> Self {
        SearchError::Qdrant(err.to_string())
    }
}

impl From<candle_core::Error> for SearchError {
    fn from(err: candle_core::Error) -> Self {
        SearchError::Embedding(err.to_string())
    }
}

/// Result type for companion-search operations
pub type Result<T> = std::result::Result<T, SearchError>;
