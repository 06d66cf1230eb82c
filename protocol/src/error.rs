use thiserror::Error;
use wavelet_types::Scheme;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("incompatible protocol version: ours {ours}, theirs {theirs}")]
    IncompatibleVersion { ours: String, theirs: String },

    #[error("message too large: {size} > {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("scheme mismatch: expected {expected}, got {actual}")]
    SchemeMismatch { expected: Scheme, actual: Scheme },

    #[error("application mismatch: expected {expected:?}, got {actual:?}")]
    ApplicationMismatch { expected: String, actual: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// The underlying I/O error, if this failure came from the socket.
    pub fn io_error(&self) -> Option<&std::io::Error> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}
