//! Top-level error type shared across crates.

use thiserror::Error;

/// Common error type for the fundamental wavelet types.
#[derive(Debug, Error)]
pub enum WaveletError {
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid encoding: {0}")]
    Encoding(String),

    #[error("invalid network scheme character: {0:?}")]
    InvalidScheme(char),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("{0}")]
    Other(String),
}
