use thiserror::Error;

#[derive(Debug, Error)]
pub enum LmdbError {
    #[error("LMDB error: {0}")]
    Heed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<heed::Error> for LmdbError {
    fn from(e: heed::Error) -> Self {
        LmdbError::Heed(e.to_string())
    }
}

impl From<LmdbError> for wavelet_store::StoreError {
    fn from(e: LmdbError) -> Self {
        wavelet_store::StoreError::Backend(e.to_string())
    }
}
