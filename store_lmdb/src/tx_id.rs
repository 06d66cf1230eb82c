//! LMDB implementation of TxIdStore.

use wavelet_store::{keys, StoreError, TxIdRecord, TxIdStore};
use wavelet_types::TxId;

use crate::block::LmdbStore;
use crate::LmdbError;

impl TxIdStore for LmdbStore {
    fn record_tx_id(&self, id: &TxId, height: u64) -> Result<TxIdRecord, StoreError> {
        let mut wtxn = self.env.env().write_txn().map_err(LmdbError::from)?;
        if let Some(bytes) = self
            .env
            .tx_ids_db
            .get(&wtxn, id.as_bytes())
            .map_err(LmdbError::from)?
        {
            return Ok(TxIdRecord::Duplicate {
                first_seen: keys::decode_height(bytes)?,
            });
        }
        self.env
            .tx_ids_db
            .put(&mut wtxn, id.as_bytes(), &keys::encode_height(height))
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(TxIdRecord::Recorded)
    }

    fn tx_id_height(&self, id: &TxId) -> Result<Option<u64>, StoreError> {
        let rtxn = self.env.env().read_txn().map_err(LmdbError::from)?;
        self.env
            .tx_ids_db
            .get(&rtxn, id.as_bytes())
            .map_err(LmdbError::from)?
            .map(keys::decode_height)
            .transpose()
    }

    fn import_height(&self) -> Result<u64, StoreError> {
        let rtxn = self.env.env().read_txn().map_err(LmdbError::from)?;
        self.env
            .meta_db
            .get(&rtxn, keys::IMPORT_HEIGHT_KEY)
            .map_err(LmdbError::from)?
            .map_or(Ok(0), keys::decode_height)
    }

    fn set_import_height(&self, height: u64) -> Result<(), StoreError> {
        let mut wtxn = self.env.env().write_txn().map_err(LmdbError::from)?;
        self.env
            .meta_db
            .put(&mut wtxn, keys::IMPORT_HEIGHT_KEY, &keys::encode_height(height))
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }
}
