//! LMDB implementation of BlockStore.

use std::path::Path;

use wavelet_ledger::{Block, StoredBlock};
use wavelet_store::{is_genesis, keys, BlockStore, StoreError};
use wavelet_types::Signature;

use crate::environment::{LmdbEnvironment, DEFAULT_MAP_SIZE};
use crate::write_batch::WriteBatch;
use crate::LmdbError;

/// Block and transaction-id storage over one LMDB environment.
#[derive(Clone)]
pub struct LmdbStore {
    pub(crate) env: LmdbEnvironment,
    genesis: Option<Signature>,
}

impl LmdbStore {
    /// Open the store in `path`, creating it if needed.
    ///
    /// `genesis` names the block that is stored at height 1. Without it, any
    /// block with a zero parent is treated as genesis.
    pub fn open(path: &Path, genesis: Option<Signature>) -> Result<Self, StoreError> {
        Self::open_with_map_size(path, genesis, DEFAULT_MAP_SIZE)
    }

    pub fn open_with_map_size(
        path: &Path,
        genesis: Option<Signature>,
        map_size: usize,
    ) -> Result<Self, StoreError> {
        let env = LmdbEnvironment::open(path, map_size)?;
        Ok(Self { env, genesis })
    }

    pub fn write_batch(&self) -> Result<WriteBatch<'_>, StoreError> {
        WriteBatch::new(&self.env)
    }
}

impl BlockStore for LmdbStore {
    fn put(&self, block: &Block) -> Result<u64, StoreError> {
        let mut batch = self.write_batch()?;

        if let Some(existing) = batch.block_height(&block.signature)? {
            return Ok(existing);
        }

        let height = if is_genesis(block, self.genesis.as_ref()) {
            1
        } else {
            match batch.block_height(&block.parent)? {
                Some(parent_height) => parent_height + 1,
                // Dropping the batch aborts the transaction.
                None => return Err(StoreError::OrphanedBlock { parent: block.parent }),
            }
        };

        batch.put_block(&block.signature, &block.to_bytes(), height)?;
        batch.commit()?;
        tracing::trace!(signature = %block.signature, height, "block stored");
        Ok(height)
    }

    fn get(&self, signature: &Signature) -> Result<StoredBlock, StoreError> {
        let rtxn = self.env.env().read_txn().map_err(LmdbError::from)?;
        let bytes = self
            .env
            .blocks_db
            .get(&rtxn, keys::block_key(signature))
            .map_err(LmdbError::from)?
            .ok_or_else(|| StoreError::NotFound(format!("block {signature}")))?;
        let block =
            Block::from_bytes(bytes).map_err(|e| StoreError::Serialization(e.to_string()))?;

        let height_bytes = self
            .env
            .blocks_db
            .get(&rtxn, &keys::height_key(signature))
            .map_err(LmdbError::from)?
            .ok_or_else(|| StoreError::Corruption(format!("block {signature} has no height")))?;
        let height = keys::decode_height(height_bytes)?;

        Ok(StoredBlock { block, height })
    }

    fn get_blocks_at_height(&self, height: u64) -> Result<Vec<Signature>, StoreError> {
        let rtxn = self.env.env().read_txn().map_err(LmdbError::from)?;
        match self
            .env
            .blocks_db
            .get(&rtxn, &keys::blocks_at_height_key(height))
            .map_err(LmdbError::from)?
        {
            Some(bytes) => keys::decode_signatures(bytes),
            None => Ok(Vec::new()),
        }
    }

    fn has(&self, signature: &Signature) -> Result<bool, StoreError> {
        let rtxn = self.env.env().read_txn().map_err(LmdbError::from)?;
        Ok(self
            .env
            .blocks_db
            .get(&rtxn, keys::block_key(signature))
            .map_err(LmdbError::from)?
            .is_some())
    }

    fn height(&self) -> Result<u64, StoreError> {
        let rtxn = self.env.env().read_txn().map_err(LmdbError::from)?;
        self.env
            .meta_db
            .get(&rtxn, keys::LAST_HEIGHT_KEY)
            .map_err(LmdbError::from)?
            .map_or(Ok(0), keys::decode_height)
    }
}
