//! Abstract storage traits for the wavelet node.
//!
//! Every storage backend (LMDB, in-memory for testing) implements these
//! traits. The rest of the codebase depends only on the traits.

pub mod block;
pub mod error;
pub mod keys;
pub mod tx_id;

pub use block::{is_genesis, BlockStore};
pub use error::StoreError;
pub use tx_id::{TxIdRecord, TxIdStore};
