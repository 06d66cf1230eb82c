//! Blake2b hashing for transaction ids.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use wavelet_types::TxId;

type Blake2b256 = Blake2b<U32>;

/// Compute a 256-bit Blake2b hash of arbitrary data.
pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    let digest = Blake2b256::digest(data);
    let mut output = [0u8; 32];
    output.copy_from_slice(&digest);
    output
}

/// Id of a transaction, derived from its raw bytes as carried in a block.
pub fn transaction_id(tx_bytes: &[u8]) -> TxId {
    TxId::new(blake2b_256(tx_bytes))
}
