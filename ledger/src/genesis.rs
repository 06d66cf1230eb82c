//! Genesis block creation.
//!
//! The genesis block has no predecessor: its parent is
//! [`Signature::ZERO`]. Nodes do not build genesis at runtime; they are
//! configured with its signature. This builder exists so that test networks
//! and fixtures can produce a genuinely signed root.

use wavelet_types::{KeyPair, Signature, Timestamp};

use crate::block::{Block, BlockBuilder, ConsensusData};

/// Initial base target for a fresh chain.
const GENESIS_BASE_TARGET: u64 = 153_722_867;

/// Configuration for creating a genesis block.
pub struct GenesisConfig<'a> {
    /// Key pair of the genesis generator.
    pub generator: &'a KeyPair,
    /// Network launch time.
    pub timestamp: Timestamp,
    /// Initial distribution transactions, as raw bytes.
    pub transactions: Vec<Vec<u8>>,
}

/// Create and sign a genesis block.
pub fn create_genesis_block(config: GenesisConfig<'_>) -> Block {
    let builder = config.transactions.into_iter().fold(
        BlockBuilder::new(Signature::ZERO)
            .timestamp(config.timestamp)
            .consensus(ConsensusData {
                base_target: GENESIS_BASE_TARGET,
                generation_signature: [0u8; 32],
            }),
        |b, tx| b.transaction(tx),
    );
    builder.sign(config.generator)
}
