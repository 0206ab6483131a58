//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid site id: {0}")]
    InvalidSiteId(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid chunk {chunk_number} of {total_chunks}")]
    InvalidChunk {
        chunk_number: u32,
        total_chunks: u32,
    },

    #[error("invalid site status: {0}")]
    InvalidStatus(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
