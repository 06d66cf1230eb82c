//! Chain view consumed by synchronization and by the request handlers.
//!
//! The "main chain" at a height is the first signature recorded at that
//! height. Forks are kept in the store but never extended through the
//! locator.

use std::sync::Arc;

use wavelet_ledger::{Block, StoredBlock};
use wavelet_store::{BlockStore, StoreError};
use wavelet_types::Signature;

/// Number of consecutive heights at the top of a locator before the step
/// starts doubling.
const LOCATOR_DENSE_PREFIX: usize = 10;

/// Block lookup and insertion as seen by the network core.
pub trait StateManager: Send + Sync {
    fn get_block(&self, signature: &Signature) -> Result<StoredBlock, StoreError>;

    /// Append a validated block. Fails with
    /// [`StoreError::OrphanedBlock`] when its parent is unknown.
    fn add_block(&self, block: &Block) -> Result<u64, StoreError>;

    fn has_block(&self, signature: &Signature) -> Result<bool, StoreError>;

    /// Local chain score: the highest stored height.
    fn score(&self) -> Result<u64, StoreError>;

    /// Tip first, then exponentially spaced ancestors down to genesis.
    fn locator(&self) -> Result<Vec<Signature>, StoreError>;

    /// The first `locator` entry we know, followed by its successors, at
    /// most `limit` signatures in total. Starts at genesis when no entry is
    /// known.
    fn signatures_after(
        &self,
        locator: &[Signature],
        limit: usize,
    ) -> Result<Vec<Signature>, StoreError>;
}

/// [`StateManager`] over any [`BlockStore`].
pub struct ChainState<S: ?Sized> {
    store: Arc<S>,
}

impl<S: BlockStore + ?Sized> ChainState<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn main_at(&self, height: u64) -> Result<Option<Signature>, StoreError> {
        Ok(self.store.get_blocks_at_height(height)?.into_iter().next())
    }

    /// The child of `parent` at `height`, preferring the main chain.
    fn child_of(&self, parent: &Signature, height: u64) -> Result<Option<Signature>, StoreError> {
        for signature in self.store.get_blocks_at_height(height)? {
            if self.store.get(&signature)?.block.parent == *parent {
                return Ok(Some(signature));
            }
        }
        Ok(None)
    }
}

impl<S: BlockStore + ?Sized> StateManager for ChainState<S> {
    fn get_block(&self, signature: &Signature) -> Result<StoredBlock, StoreError> {
        self.store.get(signature)
    }

    fn add_block(&self, block: &Block) -> Result<u64, StoreError> {
        self.store.put(block)
    }

    fn has_block(&self, signature: &Signature) -> Result<bool, StoreError> {
        self.store.has(signature)
    }

    fn score(&self) -> Result<u64, StoreError> {
        self.store.height()
    }

    fn locator(&self) -> Result<Vec<Signature>, StoreError> {
        let tip = self.store.height()?;
        let mut locator = Vec::new();
        let mut height = tip;
        let mut step = 1;
        while height >= 1 {
            if let Some(signature) = self.main_at(height)? {
                locator.push(signature);
            }
            if height == 1 {
                break;
            }
            if locator.len() >= LOCATOR_DENSE_PREFIX {
                step *= 2;
            }
            // Always end on genesis.
            height = height.saturating_sub(step).max(1);
        }
        Ok(locator)
    }

    fn signatures_after(
        &self,
        locator: &[Signature],
        limit: usize,
    ) -> Result<Vec<Signature>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut start = None;
        for signature in locator {
            match self.store.get(signature) {
                Ok(stored) => {
                    start = Some((stored.block.signature, stored.height));
                    break;
                }
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        let start = match start {
            Some(found) => Some(found),
            None => self.main_at(1)?.map(|genesis| (genesis, 1)),
        };
        let Some((mut current, mut height)) = start else {
            return Ok(Vec::new());
        };

        let mut out = vec![current];
        while out.len() < limit {
            height += 1;
            match self.child_of(&current, height)? {
                Some(next) => {
                    out.push(next);
                    current = next;
                }
                None => break,
            }
        }
        Ok(out)
    }
}
