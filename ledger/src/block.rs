//! Block structure and its canonical binary layout.
//!
//! ```text
//! version            u8
//! timestamp          u64 BE (ms)
//! parent             64 bytes (signature of the parent block)
//! consensus length   u32 BE (always 40)
//!   base target      u64 BE
//!   generation sig   32 bytes
//! tx count           u32 BE
//!   tx length        u32 BE   } repeated
//!   tx bytes         ...      }
//! generator          32 bytes (Ed25519 public key)
//! signature          64 bytes
//! ```
//!
//! The signature is computed over every byte that precedes it.

use wavelet_types::{
    KeyPair, PublicKey, Signature, Timestamp, PUBLIC_KEY_SIZE, SIGNATURE_SIZE,
};

use crate::LedgerError;

/// Current block format version.
pub const CURRENT_BLOCK_VERSION: u8 = 3;

/// Encoded size of [`ConsensusData`].
const CONSENSUS_DATA_SIZE: u32 = 8 + 32;

/// Upper bound on the number of transactions a decoded block may declare.
const MAX_TRANSACTIONS: usize = 100_000;

/// Proof-of-stake consensus fields carried by every block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConsensusData {
    pub base_target: u64,
    pub generation_signature: [u8; 32],
}

/// A block as exchanged between peers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub version: u8,
    pub timestamp: Timestamp,
    /// Signature of the parent block ([`Signature::ZERO`] for genesis).
    pub parent: Signature,
    pub consensus: ConsensusData,
    /// Raw transaction bytes, opaque to the block layer.
    pub transactions: Vec<Vec<u8>>,
    pub generator: PublicKey,
    pub signature: Signature,
}

/// A block together with the height it was stored at.
///
/// Height is derived once on insertion (genesis is 1, every other block is
/// its parent's height plus one) and never changes afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredBlock {
    pub block: Block,
    pub height: u64,
}

impl Block {
    /// Encode everything except the signature, i.e. the signed payload.
    pub fn body_bytes(&self) -> Vec<u8> {
        let tx_len: usize = self.transactions.iter().map(|t| 4 + t.len()).sum();
        let mut out = Vec::with_capacity(1 + 8 + SIGNATURE_SIZE + 4 + 40 + 4 + tx_len + 32);
        out.push(self.version);
        out.extend_from_slice(&self.timestamp.as_millis().to_be_bytes());
        out.extend_from_slice(self.parent.as_bytes());
        out.extend_from_slice(&CONSENSUS_DATA_SIZE.to_be_bytes());
        out.extend_from_slice(&self.consensus.base_target.to_be_bytes());
        out.extend_from_slice(&self.consensus.generation_signature);
        out.extend_from_slice(&(self.transactions.len() as u32).to_be_bytes());
        for tx in &self.transactions {
            out.extend_from_slice(&(tx.len() as u32).to_be_bytes());
            out.extend_from_slice(tx);
        }
        out.extend_from_slice(self.generator.as_bytes());
        out
    }

    /// Full wire encoding: body followed by the signature.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.body_bytes();
        out.extend_from_slice(self.signature.as_bytes());
        out
    }

    /// Decode a block from its wire encoding. The input must contain
    /// exactly one block.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LedgerError> {
        let mut r = Reader::new(bytes);
        let version = r.u8("version")?;
        let timestamp = Timestamp::new(r.u64("timestamp")?);
        let parent = r.signature("parent")?;

        let consensus_len = r.u32("consensus length")?;
        if consensus_len != CONSENSUS_DATA_SIZE {
            return Err(LedgerError::InvalidConsensusLength(consensus_len));
        }
        let base_target = r.u64("base target")?;
        let mut generation_signature = [0u8; 32];
        generation_signature.copy_from_slice(r.take(32, "generation signature")?);

        let count = r.u32("transaction count")? as usize;
        if count > MAX_TRANSACTIONS {
            return Err(LedgerError::TooManyTransactions(count));
        }
        let mut transactions = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let len = r.u32("transaction length")? as usize;
            transactions.push(r.take(len, "transaction")?.to_vec());
        }

        let mut generator = [0u8; PUBLIC_KEY_SIZE];
        generator.copy_from_slice(r.take(PUBLIC_KEY_SIZE, "generator")?);
        let signature = r.signature("signature")?;

        if r.remaining() > 0 {
            return Err(LedgerError::TrailingBytes(r.remaining()));
        }

        Ok(Self {
            version,
            timestamp,
            parent,
            consensus: ConsensusData {
                base_target,
                generation_signature,
            },
            transactions,
            generator: PublicKey(generator),
            signature,
        })
    }

    /// Check the block signature against the embedded generator key.
    pub fn verify_signature(&self) -> bool {
        wavelet_crypto::verify(&self.body_bytes(), &self.signature, &self.generator)
    }

    /// Like [`Block::verify_signature`] but returns a typed error.
    pub fn ensure_valid_signature(&self) -> Result<(), LedgerError> {
        if self.verify_signature() {
            Ok(())
        } else {
            Err(LedgerError::InvalidSignature {
                signature: self.signature.to_string(),
            })
        }
    }
}

/// Builds and signs blocks. Used by genesis creation and by tests that need
/// real chains.
pub struct BlockBuilder {
    version: u8,
    timestamp: Timestamp,
    parent: Signature,
    consensus: ConsensusData,
    transactions: Vec<Vec<u8>>,
}

impl BlockBuilder {
    /// Start a block on top of `parent`.
    pub fn new(parent: Signature) -> Self {
        Self {
            version: CURRENT_BLOCK_VERSION,
            timestamp: Timestamp::now(),
            parent,
            consensus: ConsensusData {
                base_target: 100,
                generation_signature: [0u8; 32],
            },
            transactions: Vec::new(),
        }
    }

    pub fn version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    pub fn timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn consensus(mut self, consensus: ConsensusData) -> Self {
        self.consensus = consensus;
        self
    }

    pub fn transaction(mut self, tx: Vec<u8>) -> Self {
        self.transactions.push(tx);
        self
    }

    /// Sign with `generator` and produce the finished block.
    pub fn sign(self, generator: &KeyPair) -> Block {
        let mut block = Block {
            version: self.version,
            timestamp: self.timestamp,
            parent: self.parent,
            consensus: self.consensus,
            transactions: self.transactions,
            generator: generator.public,
            signature: Signature::ZERO,
        };
        block.signature = wavelet_crypto::sign(&block.body_bytes(), &generator.private);
        block
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], LedgerError> {
        if self.remaining() < n {
            return Err(LedgerError::Truncated { field });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, LedgerError> {
        Ok(self.take(1, field)?[0])
    }

    fn u32(&mut self, field: &'static str) -> Result<u32, LedgerError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4, field)?);
        Ok(u32::from_be_bytes(buf))
    }

    fn u64(&mut self, field: &'static str) -> Result<u64, LedgerError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8, field)?);
        Ok(u64::from_be_bytes(buf))
    }

    fn signature(&mut self, field: &'static str) -> Result<Signature, LedgerError> {
        let mut buf = [0u8; SIGNATURE_SIZE];
        buf.copy_from_slice(self.take(SIGNATURE_SIZE, field)?);
        Ok(Signature(buf))
    }
}
