//! Error types for Trustgate core.

use thiserror::Error;

use crate::types::{Identifier, Timestamp};

/// Core errors that can occur while building or decoding primitives.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Validation errors for rotation chains and attestations.
///
/// Every variant maps to the `InvalidAttestation` class at the kernel level.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("change history is empty")]
    EmptyHistory,

    #[error("unsupported event version {version} at index {index}")]
    UnsupportedVersion { index: usize, version: u8 },

    #[error("broken hash link at index {index}")]
    BrokenLink { index: usize },

    #[error("signature verification failed at index {index}")]
    SignatureFailed { index: usize },

    #[error("timestamp regression at index {index}: {got} is earlier than {previous}")]
    TimestampRegression {
        index: usize,
        previous: Timestamp,
        got: Timestamp,
    },

    #[error("identifier mismatch: expected {expected}, genesis derives {derived}")]
    IdentifierMismatch {
        expected: Identifier,
        derived: Identifier,
    },

    #[error("attestation signature verification failed")]
    AttestationSignature,

    #[error("attestation subject mismatch: expected {expected}, got {got}")]
    SubjectMismatch { expected: Identifier, got: Identifier },

    #[error("structural error: {0}")]
    StructuralError(String),
}

impl ValidationError {
    /// Index of the first broken event, when the error concerns a chain link.
    pub fn index(&self) -> Option<usize> {
        match self {
            ValidationError::UnsupportedVersion { index, .. }
            | ValidationError::BrokenLink { index }
            | ValidationError::SignatureFailed { index }
            | ValidationError::TimestampRegression { index, .. } => Some(*index),
            _ => None,
        }
    }
}

impl From<CoreError> for ValidationError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidSignature | CoreError::InvalidPublicKey => {
                ValidationError::AttestationSignature
            }
            CoreError::InvalidIdentifier(msg)
            | CoreError::EncodingError(msg)
            | CoreError::DecodingError(msg) => ValidationError::StructuralError(msg),
        }
    }
}
