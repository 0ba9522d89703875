//! Cryptographic utilities for the vault module.
//!
//! Provides X25519 key agreement and ChaCha20-Poly1305 sealing of secrets
//! at rest under a vault master key.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use trustgate_core::crypto::byte_array;
use trustgate_core::X25519PublicKey;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::{Result, VaultError};

/// Context string for deriving master keys from passphrase-like material.
const MASTER_KEY_CONTEXT: &str = "trustgate-vault-v0 master key";

/// Generate 32 random bytes of secret material.
pub fn random_secret() -> [u8; 32] {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// An X25519 static secret key.
///
/// Unlike Ed25519, X25519 keys are only for key agreement, not signing.
pub struct X25519StaticSecret(StaticSecret);

impl X25519StaticSecret {
    /// Create from secret bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// Derive the public key.
    pub fn public_key(&self) -> X25519PublicKey {
        X25519PublicKey::from_bytes(*PublicKey::from(&self.0).as_bytes())
    }

    /// Perform key agreement with a peer's public key.
    pub fn diffie_hellman(&self, peer_public: &X25519PublicKey) -> SharedKey {
        let shared = self
            .0
            .diffie_hellman(&PublicKey::from(*peer_public.as_bytes()));
        SharedKey(*shared.as_bytes())
    }
}

/// A shared secret derived from X25519 key agreement.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedKey([u8; 32]);

impl SharedKey {
    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedKey(..)")
    }
}

/// The 256-bit key every secret of a software vault is sealed under.
#[derive(Clone)]
pub struct MasterKey([u8; 32]);

impl MasterKey {
    /// Generate a new random key.
    pub fn generate() -> Self {
        Self(random_secret())
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derive a master key from arbitrary key material.
    pub fn derive(material: &[u8]) -> Self {
        Self(blake3::derive_key(MASTER_KEY_CONTEXT, material))
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.0))
    }

    /// Seal `plaintext`, binding it to `associated` (the handle).
    pub fn seal(&self, plaintext: &[u8], associated: &[u8]) -> Result<SealedSecret> {
        let nonce = SealNonce::generate();
        let ciphertext = self
            .cipher()
            .encrypt(
                Nonce::from_slice(&nonce.0),
                Payload {
                    msg: plaintext,
                    aad: associated,
                },
            )
            .map_err(|e| VaultError::EncryptionError(e.to_string()))?;

        Ok(SealedSecret {
            format: SealFormat::ChaCha20Poly1305,
            nonce,
            ciphertext,
        })
    }

    /// Open a sealed secret. Fails if the key, blob, or `associated` differ.
    pub fn open(&self, sealed: &SealedSecret, associated: &[u8]) -> Result<Vec<u8>> {
        match sealed.format {
            SealFormat::ChaCha20Poly1305 => self
                .cipher()
                .decrypt(
                    Nonce::from_slice(&sealed.nonce.0),
                    Payload {
                        msg: &sealed.ciphertext,
                        aad: associated,
                    },
                )
                .map_err(|e| VaultError::DecryptionError(e.to_string())),
        }
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

/// A 96-bit nonce for ChaCha20-Poly1305.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealNonce(#[serde(with = "byte_array")] pub [u8; 12]);

impl SealNonce {
    /// Generate a new random nonce.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

/// Sealing algorithm identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SealFormat {
    /// ChaCha20-Poly1305 with 256-bit key.
    ChaCha20Poly1305 = 1,
}

/// A secret encrypted at rest: the `secret` column of the secret tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedSecret {
    pub format: SealFormat,
    pub nonce: SealNonce,
    /// Ciphertext including the authentication tag.
    pub ciphertext: Vec<u8>,
}

impl SealedSecret {
    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| VaultError::SerializationError(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| VaultError::SerializationError(e.to_string()))
    }
}

/// Interpret opened secret bytes as a 32-byte key.
pub fn secret_array(bytes: &[u8]) -> Result<[u8; 32]> {
    bytes
        .try_into()
        .map_err(|_| VaultError::DecryptionError(format!("expected 32 secret bytes, got {}", bytes.len())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_x25519_key_agreement() {
        let alice = X25519StaticSecret::from_bytes(random_secret());
        let bob = X25519StaticSecret::from_bytes(random_secret());

        let alice_shared = alice.diffie_hellman(&bob.public_key());
        let bob_shared = bob.diffie_hellman(&alice.public_key());

        assert_eq!(alice_shared, bob_shared);
    }

    #[test]
    fn test_seal_open() {
        let key = MasterKey::generate();
        let sealed = key.seal(b"secret seed", b"vault:1").unwrap();
        assert_ne!(sealed.ciphertext, b"secret seed");

        let bytes = sealed.to_bytes().unwrap();
        let opened = key
            .open(&SealedSecret::from_bytes(&bytes).unwrap(), b"vault:1")
            .unwrap();
        assert_eq!(opened, b"secret seed");
    }

    #[test]
    fn test_open_with_wrong_key_fails() {
        let sealed = MasterKey::generate().seal(b"secret", b"h").unwrap();
        assert!(MasterKey::generate().open(&sealed, b"h").is_err());
    }

    #[test]
    fn test_sealed_blob_bound_to_handle() {
        let key = MasterKey::derive(b"passphrase");
        let sealed = key.seal(b"secret", b"vault:a").unwrap();
        assert!(key.open(&sealed, b"vault:b").is_err());
    }

    proptest! {
        #[test]
        fn any_ciphertext_flip_is_rejected(
            secret in prop::collection::vec(any::<u8>(), 1..64),
            index in any::<prop::sample::Index>(),
        ) {
            let key = MasterKey::from_bytes([3; 32]);
            let mut sealed = key.seal(&secret, b"h").unwrap();
            let i = index.index(sealed.ciphertext.len());
            sealed.ciphertext[i] ^= 0x80;
            prop_assert!(key.open(&sealed, b"h").is_err());
        }
    }
}
