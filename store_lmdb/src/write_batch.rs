//! Write batching: groups the keys of one block insertion into a single LMDB
//! write transaction.
//!
//! If the batch is dropped without calling [`WriteBatch::commit`], all
//! operations are rolled back (the underlying LMDB transaction is aborted).

use heed::RwTxn;

use wavelet_store::keys;
use wavelet_store::StoreError;
use wavelet_types::Signature;

use crate::environment::LmdbEnvironment;
use crate::LmdbError;

pub struct WriteBatch<'a> {
    txn: RwTxn<'a>,
    env: &'a LmdbEnvironment,
}

impl<'a> WriteBatch<'a> {
    /// Begin a new write batch.
    pub(crate) fn new(env: &'a LmdbEnvironment) -> Result<Self, StoreError> {
        let txn = env.env().write_txn().map_err(LmdbError::from)?;
        Ok(Self { txn, env })
    }

    // -- Reads inside the batch --

    pub fn has_block(&self, signature: &Signature) -> Result<bool, StoreError> {
        Ok(self
            .env
            .blocks_db
            .get(&self.txn, keys::block_key(signature))
            .map_err(LmdbError::from)?
            .is_some())
    }

    pub fn block_height(&self, signature: &Signature) -> Result<Option<u64>, StoreError> {
        self.env
            .blocks_db
            .get(&self.txn, &keys::height_key(signature))
            .map_err(LmdbError::from)?
            .map(keys::decode_height)
            .transpose()
    }

    fn meta_u64(&self, key: &[u8]) -> Result<u64, StoreError> {
        self.env
            .meta_db
            .get(&self.txn, key)
            .map_err(LmdbError::from)?
            .map_or(Ok(0), keys::decode_height)
    }

    // -- Block writes --

    /// Write block bytes, height, height-index entry and the last-height
    /// marker.
    pub fn put_block(
        &mut self,
        signature: &Signature,
        block_bytes: &[u8],
        height: u64,
    ) -> Result<(), StoreError> {
        let blocks = self.env.blocks_db;
        blocks
            .put(&mut self.txn, keys::block_key(signature), block_bytes)
            .map_err(LmdbError::from)?;
        blocks
            .put(
                &mut self.txn,
                &keys::height_key(signature),
                &keys::encode_height(height),
            )
            .map_err(LmdbError::from)?;

        let index_key = keys::blocks_at_height_key(height);
        let mut index = blocks
            .get(&self.txn, &index_key)
            .map_err(LmdbError::from)?
            .map(<[u8]>::to_vec)
            .unwrap_or_default();
        index.extend_from_slice(signature.as_bytes());
        blocks
            .put(&mut self.txn, &index_key, &index)
            .map_err(LmdbError::from)?;

        if height > self.meta_u64(keys::LAST_HEIGHT_KEY)? {
            self.env
                .meta_db
                .put(
                    &mut self.txn,
                    keys::LAST_HEIGHT_KEY,
                    &keys::encode_height(height),
                )
                .map_err(LmdbError::from)?;
        }
        Ok(())
    }

    /// Commit all batched writes atomically.
    pub fn commit(self) -> Result<(), StoreError> {
        self.txn.commit().map_err(LmdbError::from)?;
        Ok(())
    }
}
