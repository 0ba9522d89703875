//! Error types for the kernel.

use thiserror::Error;
use trustgate_core::{CoreError, Identifier, Purpose, ValidationError};
use trustgate_policy::PolicyError;
use trustgate_store::StoreError;
use trustgate_vault::VaultError;

/// Why a rotation lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// The chain grew since the caller read it.
    StaleLength { expected: usize, actual: usize },
    /// The rotation is not signed by, or not linked to, the current head.
    NotCurrentHead,
}

/// Errors that can occur during kernel operations.
#[derive(Debug, Error)]
pub enum KernelError {
    /// No genesis event is recorded for the identifier.
    #[error("unknown identity: {0}")]
    UnknownIdentity(Identifier),

    /// The identifier is not a currently recognized authority.
    #[error("unknown authority: {0}")]
    UnknownAuthority(Identifier),

    /// Bad signature, broken chain link or otherwise malformed attestation.
    #[error("invalid attestation: {0}")]
    InvalidAttestation(#[from] ValidationError),

    /// Concurrent append lost; refetch the chain and retry.
    #[error("rotation conflict on {identifier}: {reason:?}")]
    RotationConflict {
        identifier: Identifier,
        reason: ConflictReason,
    },

    /// No valid purpose key for the identity.
    #[error("no {purpose} key for {identifier}")]
    NoPurposeKey {
        identifier: Identifier,
        purpose: Purpose,
    },

    /// The vault backend stayed unreachable through every retry.
    #[error("vault unavailable: {0}")]
    VaultUnavailable(String),

    /// The handle was never created or belongs to another vault.
    #[error("vault handle not found: {0}")]
    VaultHandleNotFound(String),

    /// Other vault error.
    #[error("vault error: {0}")]
    Vault(VaultError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Policy error.
    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),

    /// Encoding error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),
}

impl KernelError {
    /// Whether retrying the same operation (after refetching state) can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KernelError::VaultUnavailable(_)
                | KernelError::RotationConflict {
                    reason: ConflictReason::StaleLength { .. },
                    ..
                }
        )
    }
}

impl From<VaultError> for KernelError {
    fn from(e: VaultError) -> Self {
        match e {
            VaultError::VaultUnavailable(msg) => KernelError::VaultUnavailable(msg),
            VaultError::HandleNotFound(handle) => KernelError::VaultHandleNotFound(handle),
            other => KernelError::Vault(other),
        }
    }
}

/// Result type for kernel operations.
pub type Result<T> = std::result::Result<T, KernelError>;
