//! Transaction-id index used by the import audit.

use wavelet_types::TxId;

use crate::StoreError;

/// Outcome of recording a transaction id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxIdRecord {
    /// First sighting; the height is now on record.
    Recorded,
    /// Already seen. The stored height is left as it was.
    Duplicate { first_seen: u64 },
}

/// Maps transaction id to the height it was first seen at.
pub trait TxIdStore: Send + Sync {
    /// Record `id` at `height` unless it is already known.
    fn record_tx_id(&self, id: &TxId, height: u64) -> Result<TxIdRecord, StoreError>;

    fn tx_id_height(&self, id: &TxId) -> Result<Option<u64>, StoreError>;

    /// Last height fully imported, or 0.
    fn import_height(&self) -> Result<u64, StoreError>;

    fn set_import_height(&self, height: u64) -> Result<(), StoreError>;
}
