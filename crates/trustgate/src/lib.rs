//! # Trustgate
//!
//! The unified API for Trustgate: cryptographic identities with rotating
//! keys, attestations about them, and default-deny policies deciding what
//! they may do.
//!
//! ## Overview
//!
//! - **Ledger**: each identity is an append-only, hash-linked chain of key
//!   rotations, starting from a self-signed genesis event
//! - **Attestations**: authorities vouch for attributes of identities; purpose
//!   keys are vouched for by the identity itself
//! - **Policies**: boolean expressions over subject attributes per
//!   (resource, action)
//! - **Vaults**: identity and purpose keys live in software or remote vaults and
//!   are used through handles
//!
//! ## Key Concepts
//!
//! - **Rotation**: signed by the previous key; concurrent rotations of one
//!   identity have exactly one winner.
//! - **Authority**: only attestations from identities that are authorities now
//!   count.
//! - **Decision**: every authorization returns, and audits, the attributes and
//!   policy version it was based on. Identity failures deny; they never allow.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use trustgate::{KernelConfig, TrustKernel};
//! use trustgate::core::Timestamp;
//! use trustgate::store::{NamedVault, SqliteStore};
//! use trustgate::vault::{MasterKey, SoftwareVaultFactory, VaultKind, VaultRegistry};
//!
//! async fn example() -> trustgate::Result<()> {
//!     let store = Arc::new(SqliteStore::open("trustgate.db")?);
//!     let vaults = VaultRegistry::new().with_factory(
//!         VaultKind::Software,
//!         Arc::new(SoftwareVaultFactory::new(store.clone(), MasterKey::generate())),
//!     );
//!     let kernel = TrustKernel::open(store, vaults, KernelConfig::default()).await?;
//!     kernel.add_vault(NamedVault::new("local", "trustgate.db", false)).await?;
//!
//!     let alice = kernel.create_identity(Some("local"), Timestamp::now()).await?;
//!     kernel
//!         .policies()
//!         .set_policy_text("vault", "read", r#"(= subject.role "admin")"#)
//!         .await?;
//!
//!     let decision = kernel
//!         .authorize(&alice.identifier, "vault", "read", Timestamp::now())
//!         .await?;
//!     assert!(!decision.is_allowed());
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `trustgate::core` - Identifiers, rotation chains, attestations
//! - `trustgate::store` - Storage abstraction and SQLite
//! - `trustgate::vault` - Vault trait, backends and registry
//! - `trustgate::policy` - Policy expressions and evaluation

pub mod attestation;
pub mod authorize;
pub mod config;
pub mod error;
pub mod kernel;
pub mod ledger;

pub use trustgate_core as core;
pub use trustgate_policy as policy;
pub use trustgate_store as store;
pub use trustgate_vault as vault;

pub use attestation::AttestationStore;
pub use authorize::{
    AuditSink, Authorizer, Decision, DenialReason, Outcome, RecordingAuditSink, TracingAuditSink,
};
pub use config::KernelConfig;
pub use error::{ConflictReason, KernelError, Result};
pub use kernel::{TrustKernel, VaultIdentity};
pub use ledger::IdentityLedger;

pub use trustgate_core::{
    AttributeMap, AttributeValue, Identifier, Keypair, Purpose, PurposeKeyAttestation, Timestamp,
};
