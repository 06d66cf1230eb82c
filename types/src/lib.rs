//! Fundamental types for the wavelet node.
//!
//! This crate defines the core types shared across every other crate in the
//! workspace: block signatures, keys, transaction ids, timestamps and the
//! network scheme byte.

pub mod error;
pub mod hash;
pub mod keys;
pub mod scheme;
pub mod time;

pub use error::WaveletError;
pub use hash::TxId;
pub use keys::{KeyPair, PrivateKey, PublicKey, Signature, PUBLIC_KEY_SIZE, SIGNATURE_SIZE};
pub use scheme::Scheme;
pub use time::Timestamp;
