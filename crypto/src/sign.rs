//! Ed25519 key generation, signing and verification.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use wavelet_types::{KeyPair, PrivateKey, PublicKey, Signature};

/// Generate a new key pair from a secure random source.
pub fn generate_keypair() -> KeyPair {
    split(SigningKey::generate(&mut OsRng))
}

/// Derive a key pair from a 32-byte seed (deterministic).
pub fn keypair_from_seed(seed: &[u8; 32]) -> KeyPair {
    split(SigningKey::from_bytes(seed))
}

/// Derive the public key from a private key.
pub fn public_from_private(private: &PrivateKey) -> PublicKey {
    PublicKey(SigningKey::from_bytes(&private.0).verifying_key().to_bytes())
}

fn split(signing_key: SigningKey) -> KeyPair {
    KeyPair {
        public: PublicKey(signing_key.verifying_key().to_bytes()),
        private: PrivateKey(signing_key.to_bytes()),
    }
}

/// Sign `message` with `private_key`.
pub fn sign(message: &[u8], private_key: &PrivateKey) -> Signature {
    let signing_key = SigningKey::from_bytes(&private_key.0);
    Signature(signing_key.sign(message).to_bytes())
}

/// Check `signature` over `message` against `public_key`.
///
/// A public key that is not a valid curve point verifies nothing.
pub fn verify(message: &[u8], signature: &Signature, public_key: &PublicKey) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(&public_key.0) else {
        return false;
    };
    let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
    verifying_key.verify(message, &sig).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_message_verifies() {
        let kp = generate_keypair();
        let sig = sign(b"block body", &kp.private);
        assert!(verify(b"block body", &sig, &kp.public));
    }

    #[test]
    fn tampered_message_fails() {
        let kp = generate_keypair();
        let sig = sign(b"block body", &kp.private);
        assert!(!verify(b"block b0dy", &sig, &kp.public));
    }

    #[test]
    fn foreign_key_fails() {
        let kp = keypair_from_seed(&[1u8; 32]);
        let other = keypair_from_seed(&[2u8; 32]);
        let sig = sign(b"block body", &kp.private);
        assert!(!verify(b"block body", &sig, &other.public));
    }

    #[test]
    fn seeded_keys_are_deterministic() {
        let a = keypair_from_seed(&[9u8; 32]);
        let b = keypair_from_seed(&[9u8; 32]);
        assert_eq!(a.public, b.public);
        assert_eq!(public_from_private(&a.private), a.public);
        assert_eq!(sign(b"x", &a.private), sign(b"x", &b.private));
    }

    #[test]
    fn invalid_public_key_rejects() {
        let kp = generate_keypair();
        let sig = sign(b"x", &kp.private);
        assert!(!verify(b"x", &sig, &PublicKey([0xFF; 32])));
    }
}
