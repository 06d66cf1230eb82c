//! Cryptographic key types for block generators and block signatures.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::WaveletError;

/// Length of an Ed25519 signature in bytes.
pub const SIGNATURE_SIZE: usize = 64;

/// Length of an Ed25519 public key in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// A 32-byte Ed25519 public key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; PUBLIC_KEY_SIZE]);

/// A 32-byte Ed25519 private key (secret scalar).
///
/// This type intentionally does not implement `Debug`, `Serialize`, or `Clone`
/// to prevent accidental exposure. Key bytes are zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey(pub [u8; 32]);

/// A 64-byte Ed25519 signature.
///
/// A block's signature is also its identifier: it is the primary key in the
/// block store and the value peers use to request blocks from each other.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature(pub [u8; SIGNATURE_SIZE]);

impl Signature {
    /// All-zero signature, used as the parent reference of a genesis block.
    pub const ZERO: Self = Self([0u8; SIGNATURE_SIZE]);

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; SIGNATURE_SIZE]
    }

    /// Build a signature from a byte slice of exactly [`SIGNATURE_SIZE`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, WaveletError> {
        let arr: [u8; SIGNATURE_SIZE] = bytes.try_into().map_err(|_| {
            WaveletError::InvalidLength {
                expected: SIGNATURE_SIZE,
                actual: bytes.len(),
            }
        })?;
        Ok(Self(arr))
    }

    /// Parse a hex-encoded signature.
    pub fn from_hex(s: &str) -> Result<Self, WaveletError> {
        let bytes = hex::decode(s).map_err(|e| WaveletError::Encoding(e.to_string()))?;
        Self::from_slice(&bytes)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(&self.0[..6]))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SigVisitor;

        impl<'de> serde::de::Visitor<'de> for SigVisitor {
            type Value = Signature;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(f, "64 bytes")
            }

            fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                let arr: [u8; SIGNATURE_SIZE] = v
                    .try_into()
                    .map_err(|_| E::invalid_length(v.len(), &self))?;
                Ok(Signature(arr))
            }

            fn visit_seq<A: serde::de::SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> Result<Self::Value, A::Error> {
                let mut arr = [0u8; SIGNATURE_SIZE];
                for (i, byte) in arr.iter_mut().enumerate() {
                    *byte = seq
                        .next_element()?
                        .ok_or_else(|| serde::de::Error::invalid_length(i, &self))?;
                }
                Ok(Signature(arr))
            }
        }

        deserializer.deserialize_bytes(SigVisitor)
    }
}

/// An Ed25519 key pair (public + private).
///
/// Use `wavelet_crypto::generate_keypair()` or `wavelet_crypto::keypair_from_seed()`
/// to construct key pairs. This struct is intentionally just data.
pub struct KeyPair {
    pub public: PublicKey,
    pub private: PrivateKey,
}

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }
}
