//! The Vault trait: uniform secret custody over heterogeneous backends.

use std::fmt;

use async_trait::async_trait;
use trustgate_core::{Ed25519PublicKey, Ed25519Signature, X25519PublicKey};

use crate::crypto::SharedKey;
use crate::error::{Result, VaultError};
use crate::handle::{RequestToken, SecretHandle, SecretType};

/// Backend family of a vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VaultKind {
    /// Secrets sealed locally under a master key.
    Software,
    /// Keys held by a remote key-management service.
    AwsKms,
}

impl VaultKind {
    /// The kind recorded by a `vault` row's `is_aws_kms` flag.
    pub fn from_aws_kms_flag(is_aws_kms: bool) -> Self {
        if is_aws_kms {
            VaultKind::AwsKms
        } else {
            VaultKind::Software
        }
    }
}

impl fmt::Display for VaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VaultKind::Software => f.write_str("software"),
            VaultKind::AwsKms => f.write_str("aws-kms"),
        }
    }
}

/// Public half of a vault-held secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultPublicKey {
    Ed25519(Ed25519PublicKey),
    X25519(X25519PublicKey),
}

impl VaultPublicKey {
    pub fn secret_type(&self) -> SecretType {
        match self {
            VaultPublicKey::Ed25519(_) => SecretType::Ed25519,
            VaultPublicKey::X25519(_) => SecretType::X25519,
        }
    }

    /// The Ed25519 key, or `WrongSecretType` for `handle`.
    pub fn ed25519(&self, handle: &SecretHandle) -> Result<Ed25519PublicKey> {
        match self {
            VaultPublicKey::Ed25519(key) => Ok(*key),
            VaultPublicKey::X25519(_) => Err(VaultError::WrongSecretType {
                handle: handle.to_string(),
                expected: SecretType::Ed25519.to_string(),
            }),
        }
    }

    /// The X25519 key, or `WrongSecretType` for `handle`.
    pub fn x25519(&self, handle: &SecretHandle) -> Result<X25519PublicKey> {
        match self {
            VaultPublicKey::X25519(key) => Ok(*key),
            VaultPublicKey::Ed25519(_) => Err(VaultError::WrongSecretType {
                handle: handle.to_string(),
                expected: SecretType::X25519.to_string(),
            }),
        }
    }
}

/// A secret-custody backend.
///
/// Raw key material never leaves a vault. Every handle a vault returns is
/// prefixed with its name; handles of other vaults are rejected with
/// [`VaultError::HandleNotFound`].
#[async_trait]
pub trait Vault: Send + Sync {
    /// The vault's unique name.
    fn name(&self) -> &str;

    /// The backend family.
    fn kind(&self) -> VaultKind;

    /// Generate a new secret. Repeating a call with the same `token` returns
    /// the same handle instead of creating a second key.
    async fn generate_key(
        &self,
        secret_type: SecretType,
        token: &RequestToken,
    ) -> Result<SecretHandle>;

    /// Sign `message` with an Ed25519 secret.
    async fn sign(&self, handle: &SecretHandle, message: &[u8]) -> Result<Ed25519Signature>;

    /// Public key of a secret.
    async fn public_key(&self, handle: &SecretHandle) -> Result<VaultPublicKey>;

    /// Discard a secret. Returns whether it existed.
    async fn delete_key(&self, handle: &SecretHandle) -> Result<bool>;

    /// All handles held by this vault.
    async fn list_handles(&self) -> Result<Vec<SecretHandle>>;

    /// Take custody of existing secret material.
    async fn import_key(&self, _secret_type: SecretType, _secret: &[u8; 32]) -> Result<SecretHandle> {
        Err(self.unsupported("import_key"))
    }

    /// X25519 key agreement with a peer.
    async fn key_agreement(
        &self,
        _handle: &SecretHandle,
        _peer: &X25519PublicKey,
    ) -> Result<SharedKey> {
        Err(self.unsupported("key_agreement"))
    }

    /// Error for an operation this backend does not offer.
    fn unsupported(&self, operation: &str) -> VaultError {
        VaultError::Unsupported {
            vault: self.name().to_owned(),
            operation: operation.to_owned(),
        }
    }

    /// Reject handles minted by another vault.
    fn check_owner(&self, handle: &SecretHandle) -> Result<()> {
        if handle.is_owned_by(self.name()) {
            Ok(())
        } else {
            Err(VaultError::HandleNotFound(handle.to_string()))
        }
    }
}
