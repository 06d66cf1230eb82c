//! Cryptographic primitives for the wavelet node.
//!
//! - **Ed25519** for block signatures: a block is signed by its generator and
//!   the signature doubles as the block id.
//! - **Blake2b-256** for transaction ids.

pub mod hash;
pub mod sign;

pub use hash::{blake2b_256, transaction_id};
pub use sign::{generate_keypair, keypair_from_seed, public_from_private, sign, verify};
