//! # Trustgate Core
//!
//! Pure primitives for Trustgate: identifiers, rotation chains, attribute
//! attestations, purpose keys, and canonicalization.
//!
//! This crate contains no I/O, no storage, no networking. It is pure computation
//! over cryptographic data structures.
//!
//! ## Key Types
//!
//! - [`Identifier`] - Stable identity name derived from the genesis key
//! - [`ChangeHistory`] - Append-only, hash-linked key rotation chain
//! - [`AttributesEntry`] - A set of attributes an authority vouched for
//! - [`PurposeKeyAttestation`] - A key bound to one purpose by its identity
//! - [`AttributeCredential`] - A signed, portable attribute attestation
//!
//! ## Canonicalization
//!
//! Everything that gets signed is encoded using deterministic CBOR with a
//! domain prefix. See [`canonical`] module.

pub mod attributes;
pub mod canonical;
pub mod change;
pub mod credential;
pub mod crypto;
pub mod error;
pub mod purpose;
pub mod types;
pub mod validation;

pub use attributes::{AttributeMap, AttributeValue, AttributesEntry};
pub use change::{ChangeHistory, EventIndex, RotationEvent, UnsignedRotation};
pub use credential::{AttributeCredential, CredentialBody};
pub use crypto::{Blake3Hash, Ed25519PublicKey, Ed25519Signature, Keypair, X25519PublicKey};
pub use error::{CoreError, ValidationError};
pub use purpose::{Purpose, PurposeKeyAttestation, PurposeKeyAttestationBuilder, PurposePublicKey};
pub use types::{Identifier, Timestamp};
pub use validation::{verify_chain, verify_chain_for, verify_genesis, verify_rotation};
