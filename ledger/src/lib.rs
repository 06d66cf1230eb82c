//! Block model for the wavelet chain.
//!
//! Blocks form a tree rooted at genesis: every block names its parent by
//! signature, and competing children of one parent are forks. A block's
//! signature covers its canonical binary encoding (everything except the
//! signature itself) and is checked against the generator key the block
//! carries.

pub mod block;
pub mod error;
pub mod genesis;
pub mod transaction;

pub use block::{Block, BlockBuilder, ConsensusData, StoredBlock, CURRENT_BLOCK_VERSION};
pub use error::LedgerError;
pub use genesis::{create_genesis_block, GenesisConfig};
pub use transaction::{transaction_type, TransactionRef};
