//! Bloom filter error types.

use thiserror::Error;

/// Errors that can occur while encoding or decoding a bloom filter
#[derive(Error, Debug)]
pub enum BloomFilterError {
    /// Compression or decompression failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Decoded payload does not describe a usable filter
    #[error("Invalid filter: {0}")]
    Invalid(String),
}

impl From<serde_json::Error> for BloomFilterError {
    fn from(err: serde_json::Error) -> Self {
        BloomFilterError::Serialization(err.to_string())
    }
}
