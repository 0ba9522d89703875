//! Secret handles, secret types and request tokens.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, VaultError};

/// Separates the owning vault's name from the backend key id.
pub const HANDLE_SEPARATOR: char = ':';

/// Opaque reference to a secret held by exactly one vault.
///
/// The textual form is `<vault name>:<key id>`. The key id is backend-specific
/// and may itself contain `:` (remote key ARNs do); the vault name may not.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SecretHandle(String);

impl SecretHandle {
    /// Build a handle owned by `vault`.
    pub fn new(vault: &str, key_id: &str) -> Result<Self> {
        validate_vault_name(vault)?;
        Ok(Self(format!("{}{}{}", vault, HANDLE_SEPARATOR, key_id)))
    }

    /// Name of the vault that owns this handle.
    pub fn vault_name(&self) -> &str {
        self.0
            .split_once(HANDLE_SEPARATOR)
            .map(|(vault, _)| vault)
            .unwrap_or("")
    }

    /// Backend key id.
    pub fn key_id(&self) -> &str {
        self.0
            .split_once(HANDLE_SEPARATOR)
            .map(|(_, id)| id)
            .unwrap_or("")
    }

    /// Whether `vault` owns this handle.
    pub fn is_owned_by(&self, vault: &str) -> bool {
        self.vault_name() == vault
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SecretHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SecretHandle {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(HANDLE_SEPARATOR) {
            Some((vault, id)) if !vault.is_empty() && !id.is_empty() => Ok(Self(s.to_owned())),
            _ => Err(VaultError::HandleNotFound(s.to_owned())),
        }
    }
}

/// Check that a vault name can prefix a handle.
pub fn validate_vault_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(HANDLE_SEPARATOR) {
        return Err(VaultError::InvalidName(name.to_owned()));
    }
    Ok(())
}

/// What a secret is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecretType {
    /// Ed25519 signing key.
    Ed25519,
    /// X25519 key-agreement key.
    X25519,
}

impl SecretType {
    /// Value of the `secret_type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretType::Ed25519 => "ed25519",
            SecretType::X25519 => "x25519",
        }
    }
}

impl fmt::Display for SecretType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client-assigned token that makes key generation idempotent across retries.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestToken(pub [u8; 16]);

impl RequestToken {
    /// A fresh random token.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestToken({})", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_parts() {
        let handle = SecretHandle::new("kms", "arn:aws:kms:eu-west-1:key/1").unwrap();
        assert_eq!(handle.vault_name(), "kms");
        assert_eq!(handle.key_id(), "arn:aws:kms:eu-west-1:key/1");
        assert!(handle.is_owned_by("kms"));
        assert!(!handle.is_owned_by("local"));
        assert_eq!(handle.to_string().parse::<SecretHandle>().unwrap(), handle);
    }

    #[test]
    fn test_vault_name_cannot_contain_separator() {
        assert!(SecretHandle::new("a:b", "1").is_err());
        assert!(SecretHandle::new("", "1").is_err());
        assert!("nohandle".parse::<SecretHandle>().is_err());
    }
}
