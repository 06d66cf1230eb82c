//! Nullable store: thread-safe in-memory storage for testing.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use wavelet_ledger::{Block, StoredBlock};
use wavelet_store::{is_genesis, BlockStore, StoreError, TxIdRecord, TxIdStore};
use wavelet_types::{Signature, TxId};

#[derive(Default)]
struct Inner {
    blocks: HashMap<Signature, StoredBlock>,
    at_height: HashMap<u64, Vec<Signature>>,
    last_height: u64,
    tx_ids: HashMap<TxId, u64>,
    import_height: u64,
}

/// An in-memory block + transaction-id store for testing.
/// Thread-safe for use with tokio's multi-threaded runtime.
#[derive(Default)]
pub struct NullStore {
    genesis: Option<Signature>,
    inner: Mutex<Inner>,
}

impl NullStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that treats `genesis` as the height-1 block.
    pub fn with_genesis(genesis: Signature) -> Self {
        Self {
            genesis: Some(genesis),
            inner: Mutex::default(),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of stored blocks.
    pub fn len(&self) -> usize {
        self.inner().blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner().blocks.is_empty()
    }
}

impl BlockStore for NullStore {
    fn put(&self, block: &Block) -> Result<u64, StoreError> {
        let mut inner = self.inner();
        if let Some(existing) = inner.blocks.get(&block.signature) {
            return Ok(existing.height);
        }
        let height = if is_genesis(block, self.genesis.as_ref()) {
            1
        } else {
            inner
                .blocks
                .get(&block.parent)
                .map(|p| p.height + 1)
                .ok_or(StoreError::OrphanedBlock {
                    parent: block.parent,
                })?
        };
        inner.blocks.insert(
            block.signature,
            StoredBlock {
                block: block.clone(),
                height,
            },
        );
        inner.at_height.entry(height).or_default().push(block.signature);
        inner.last_height = inner.last_height.max(height);
        Ok(height)
    }

    fn get(&self, signature: &Signature) -> Result<StoredBlock, StoreError> {
        self.inner()
            .blocks
            .get(signature)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("block {signature}")))
    }

    fn get_blocks_at_height(&self, height: u64) -> Result<Vec<Signature>, StoreError> {
        Ok(self.inner().at_height.get(&height).cloned().unwrap_or_default())
    }

    fn has(&self, signature: &Signature) -> Result<bool, StoreError> {
        Ok(self.inner().blocks.contains_key(signature))
    }

    fn height(&self) -> Result<u64, StoreError> {
        Ok(self.inner().last_height)
    }
}

impl TxIdStore for NullStore {
    fn record_tx_id(&self, id: &TxId, height: u64) -> Result<TxIdRecord, StoreError> {
        let mut inner = self.inner();
        if let Some(first_seen) = inner.tx_ids.get(id) {
            return Ok(TxIdRecord::Duplicate {
                first_seen: *first_seen,
            });
        }
        inner.tx_ids.insert(*id, height);
        Ok(TxIdRecord::Recorded)
    }

    fn tx_id_height(&self, id: &TxId) -> Result<Option<u64>, StoreError> {
        Ok(self.inner().tx_ids.get(id).copied())
    }

    fn import_height(&self) -> Result<u64, StoreError> {
        Ok(self.inner().import_height)
    }

    fn set_import_height(&self, height: u64) -> Result<(), StoreError> {
        self.inner().import_height = height;
        Ok(())
    }
}
