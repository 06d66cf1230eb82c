//! Nullable infrastructure for deterministic testing.
//!
//! Test-friendly implementations of the storage traits that never touch the
//! filesystem. Swap them in wherever a test does not care about
//! persistence.

pub mod store;

pub use store::NullStore;
