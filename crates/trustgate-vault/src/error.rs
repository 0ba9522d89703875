//! Error types for the vault module.

use thiserror::Error;
use trustgate_core::CoreError;
use trustgate_store::StoreError;

/// Errors that can occur during vault operations.
#[derive(Debug, Error)]
pub enum VaultError {
    /// The backend could not be reached or timed out. Retryable.
    #[error("vault unavailable: {0}")]
    VaultUnavailable(String),

    /// The handle was never created, or belongs to a different vault.
    #[error("secret handle not found: {0}")]
    HandleNotFound(String),

    /// The handle refers to a secret of the wrong kind for the operation.
    #[error("handle {handle} is not a {expected} secret")]
    WrongSecretType { handle: String, expected: String },

    /// The backend does not support this operation.
    #[error("operation not supported by vault {vault}: {operation}")]
    Unsupported { vault: String, operation: String },

    /// No vault is registered under this name.
    #[error("unknown vault: {0}")]
    UnknownVault(String),

    /// No factory is registered for this backend kind.
    #[error("no factory for vault kind {0}")]
    NoFactory(String),

    /// Vault names may not contain the handle separator.
    #[error("invalid vault name: {0}")]
    InvalidName(String),

    /// Sealing a secret failed.
    #[error("encryption error: {0}")]
    EncryptionError(String),

    /// Opening a sealed secret failed (wrong master key or tampered blob).
    #[error("decryption error: {0}")]
    DecryptionError(String),

    /// Sealed blob could not be encoded or decoded.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Persistence error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Core error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),
}

impl VaultError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, VaultError::VaultUnavailable(_))
    }
}

/// Result type for vault operations.
pub type Result<T> = std::result::Result<T, VaultError>;
