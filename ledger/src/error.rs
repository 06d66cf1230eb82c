use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("block truncated while reading {field}")]
    Truncated { field: &'static str },

    #[error("{0} trailing bytes after block signature")]
    TrailingBytes(usize),

    #[error("invalid consensus data length: {0}")]
    InvalidConsensusLength(u32),

    #[error("too many transactions: {0}")]
    TooManyTransactions(usize),

    #[error("block {signature} has an invalid signature")]
    InvalidSignature { signature: String },
}
