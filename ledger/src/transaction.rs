//! Minimal view over raw transaction bytes.
//!
//! The block layer treats transactions as opaque blobs. Only two facts are
//! ever extracted: the type byte, for filtering, and the id, for duplicate
//! detection.

use wavelet_types::TxId;

/// Transaction type as encoded in its leading bytes.
///
/// Versioned transactions start with a zero byte followed by the type;
/// legacy ones start with the type directly. Empty input yields `None`.
pub fn transaction_type(tx: &[u8]) -> Option<u8> {
    match tx {
        [] => None,
        [0, ty, ..] => Some(*ty),
        [0] => None,
        [ty, ..] => Some(*ty),
    }
}

/// A borrowed transaction together with its derived id.
#[derive(Debug, Clone, Copy)]
pub struct TransactionRef<'a> {
    pub bytes: &'a [u8],
    pub id: TxId,
}

impl<'a> TransactionRef<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            id: wavelet_crypto::transaction_id(bytes),
        }
    }

    pub fn tx_type(&self) -> Option<u8> {
        transaction_type(self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_type_is_first_byte() {
        assert_eq!(transaction_type(&[4, 1, 2]), Some(4));
    }

    #[test]
    fn versioned_type_is_second_byte() {
        assert_eq!(transaction_type(&[0, 12, 2]), Some(12));
    }

    #[test]
    fn short_inputs() {
        assert_eq!(transaction_type(&[]), None);
        assert_eq!(transaction_type(&[0]), None);
    }

    #[test]
    fn ref_derives_id_from_bytes() {
        let a = TransactionRef::new(&[4, 1, 2]);
        let b = TransactionRef::new(&[4, 1, 2]);
        assert_eq!(a.id, b.id);
        assert_eq!(a.tx_type(), Some(4));
    }
}
