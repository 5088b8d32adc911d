//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("invalid file id: {0}")]
    InvalidFileId(String),

    #[error("invalid public token: {0}")]
    InvalidToken(String),

    #[error("invalid search filter: {0}")]
    InvalidFilter(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
