//! Error types for the policy module.

use thiserror::Error;
use trustgate_store::StoreError;

/// Errors that can occur while managing policies.
///
/// Evaluation itself never fails: unknown facts are treated as absent.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Text expression could not be parsed.
    #[error("parse error at byte {position}: {message}")]
    Parse { position: usize, message: String },

    /// Stored expression blob could not be decoded.
    #[error("invalid expression blob: {0}")]
    Decode(String),

    /// Expression could not be encoded.
    #[error("expression encoding failed: {0}")]
    Encode(String),

    /// Expression nests deeper than the engine accepts.
    #[error("expression nested deeper than {max} levels")]
    TooDeep { max: usize },

    /// Persistence error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for policy operations.
pub type Result<T> = std::result::Result<T, PolicyError>;
