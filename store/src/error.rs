use thiserror::Error;
use wavelet_types::Signature;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("block orphaned: parent {parent} is not stored")]
    OrphanedBlock { parent: Signature },

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("database is corrupted: {0}")]
    Corruption(String),
}

impl StoreError {
    pub fn is_orphan(&self) -> bool {
        matches!(self, Self::OrphanedBlock { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
