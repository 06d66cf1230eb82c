//! LMDB storage backend for the wavelet node.
//!
//! Implements the `wavelet-store` traits using the `heed` LMDB bindings.
//! Blocks, transaction ids and metadata live in three named databases of a
//! single environment.

pub mod block;
pub mod environment;
pub mod error;
pub mod tx_id;
pub mod write_batch;

pub use block::LmdbStore;
pub use environment::LmdbEnvironment;
pub use error::LmdbError;
