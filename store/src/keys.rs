//! Key layout shared by the key/value backends.
//!
//! ```text
//! signature                       -> block bytes
//! signature || "h"                -> height, u64 BE
//! "blocks_at_height_" || height   -> concatenated 64-byte signatures
//! ```
//!
//! `height` in the index key is the decimal representation.

use wavelet_types::{Signature, SIGNATURE_SIZE};

use crate::StoreError;

pub const HEIGHT_SUFFIX: &[u8] = b"h";
pub const BLOCKS_AT_HEIGHT_PREFIX: &str = "blocks_at_height_";
/// Meta key holding the highest stored height.
pub const LAST_HEIGHT_KEY: &[u8] = b"last_height";
/// Meta key holding the last height processed by the importer.
pub const IMPORT_HEIGHT_KEY: &[u8] = b"import_height";

pub fn block_key(signature: &Signature) -> &[u8] {
    signature.as_bytes()
}

pub fn height_key(signature: &Signature) -> Vec<u8> {
    let mut key = Vec::with_capacity(SIGNATURE_SIZE + HEIGHT_SUFFIX.len());
    key.extend_from_slice(signature.as_bytes());
    key.extend_from_slice(HEIGHT_SUFFIX);
    key
}

pub fn blocks_at_height_key(height: u64) -> Vec<u8> {
    format!("{BLOCKS_AT_HEIGHT_PREFIX}{height}").into_bytes()
}

pub fn encode_height(height: u64) -> [u8; 8] {
    height.to_be_bytes()
}

pub fn decode_height(bytes: &[u8]) -> Result<u64, StoreError> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Corruption(format!("height value of {} bytes", bytes.len())))?;
    Ok(u64::from_be_bytes(arr))
}

pub fn encode_signatures(signatures: &[Signature]) -> Vec<u8> {
    signatures.iter().flat_map(|s| s.as_bytes().iter().copied()).collect()
}

pub fn decode_signatures(bytes: &[u8]) -> Result<Vec<Signature>, StoreError> {
    if bytes.len() % SIGNATURE_SIZE != 0 {
        return Err(StoreError::Corruption(format!(
            "height index value of {} bytes",
            bytes.len()
        )));
    }
    bytes
        .chunks_exact(SIGNATURE_SIZE)
        .map(|c| Signature::from_slice(c).map_err(|e| StoreError::Corruption(e.to_string())))
        .collect()
}
