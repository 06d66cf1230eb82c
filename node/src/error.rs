use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("ledger error: {0}")]
    Ledger(#[from] wavelet_ledger::LedgerError),

    #[error("store error: {0}")]
    Store(#[from] wavelet_store::StoreError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("import error: {0}")]
    Import(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
