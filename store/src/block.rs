//! Block storage trait.

use wavelet_ledger::{Block, StoredBlock};
use wavelet_types::Signature;

use crate::StoreError;

/// Fork-aware, content-addressed block storage.
///
/// Blocks are keyed by signature. Each stored block gets a height derived
/// from its parent, and a per-height index lists every block at that height
/// so competing forks coexist.
pub trait BlockStore: Send + Sync {
    /// Store a block and return its height.
    ///
    /// Genesis gets height 1; any other block gets its parent's height plus
    /// one. Fails with [`StoreError::OrphanedBlock`] when the parent is not
    /// stored, leaving the store untouched. Storing a block that is already
    /// present returns its existing height.
    fn put(&self, block: &Block) -> Result<u64, StoreError>;

    /// Retrieve a block with its height.
    fn get(&self, signature: &Signature) -> Result<StoredBlock, StoreError>;

    /// Signatures of every block stored at `height`, in insertion order.
    /// Empty if there are none.
    fn get_blocks_at_height(&self, height: u64) -> Result<Vec<Signature>, StoreError>;

    /// Check if a block is stored.
    fn has(&self, signature: &Signature) -> Result<bool, StoreError>;

    /// Highest height stored so far, or 0 for an empty store.
    fn height(&self) -> Result<u64, StoreError>;
}

/// Whether `block` roots the chain.
///
/// With a configured genesis signature only that block qualifies. Without
/// one, any block with a zero parent does.
pub fn is_genesis(block: &Block, genesis: Option<&Signature>) -> bool {
    match genesis {
        Some(sig) => block.signature == *sig,
        None => block.parent.is_zero(),
    }
}
