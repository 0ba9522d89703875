//! Store traits: the abstract interface for identity, trust and secret persistence.
//!
//! These traits keep the kernel storage-agnostic. Implementations include
//! SQLite (primary) and in-memory (for tests).

use std::path::PathBuf;

use async_trait::async_trait;
use trustgate_core::{
    AttributesEntry, ChangeHistory, Identifier, Purpose, PurposeKeyAttestation, Timestamp,
};

use crate::error::Result;

/// Result of enrolling an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollResult {
    /// Identity and enrollment record were written.
    Inserted,
    /// The identifier is already enrolled; its stored history is returned.
    AlreadyExists(ChangeHistory),
}

/// Result of a compare-and-swap on a change history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasResult {
    /// The new history replaced the old one.
    Swapped,
    /// The stored history did not have the expected length.
    Conflict {
        /// The length actually stored.
        actual_len: usize,
    },
    /// No history is stored for the identifier.
    Missing,
}

/// A stored policy row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRecord {
    pub resource: String,
    pub action: String,
    /// Serialized expression.
    pub expression: Vec<u8>,
}

/// An identity trusted to issue attestations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityRecord {
    pub identifier: Identifier,
    /// Network address the authority answers enrollment requests on.
    pub address: String,
    /// The authority's own change history.
    pub change_history: ChangeHistory,
}

/// A named vault backend record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedVault {
    pub name: String,
    /// Database path for software vaults, key-service locator for remote ones.
    pub path: PathBuf,
    pub is_aws_kms: bool,
    pub is_default: bool,
}

impl NamedVault {
    /// A non-default vault record.
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, is_aws_kms: bool) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            is_aws_kms,
            is_default: false,
        }
    }
}

/// A sealed signing secret row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSecret {
    pub secret_type: String,
    /// Sealed secret bytes; never the raw key.
    pub secret: Vec<u8>,
}

/// The Store trait: async interface for identity and trust state.
///
/// All methods are async to support both sync (SQLite) and async backends.
/// For SQLite, `spawn_blocking` is used internally to avoid blocking the runtime.
///
/// # Design Notes
///
/// - **Append-only identities**: histories only change through
///   [`Store::compare_and_swap_history`], which accepts exactly one writer per
///   expected length.
/// - **Attestation history**: every attestation is retained; the
///   `identity_attributes` row mirrors the newest one.
/// - **Purpose keys**: superseded keys are kept, listed in issuance order.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Identity Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Write a new identity and its enrollment record atomically.
    ///
    /// Returns `AlreadyExists` with the stored history if the identifier is
    /// already enrolled; nothing is overwritten.
    async fn enroll_identity(
        &self,
        identifier: &Identifier,
        history: &ChangeHistory,
        enrolled_at: Timestamp,
    ) -> Result<EnrollResult>;

    /// Get the change history of an identity.
    async fn get_change_history(&self, identifier: &Identifier) -> Result<Option<ChangeHistory>>;

    /// Replace a history if the stored one still has `expected_len` events.
    async fn compare_and_swap_history(
        &self,
        identifier: &Identifier,
        expected_len: usize,
        history: &ChangeHistory,
    ) -> Result<CasResult>;

    /// Get the enrollment timestamp of an identity.
    async fn get_enrollment(&self, identifier: &Identifier) -> Result<Option<Timestamp>>;

    /// List all enrolled identifiers, sorted.
    async fn list_identifiers(&self) -> Result<Vec<Identifier>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Attestation Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Record an attestation about `identifier`.
    async fn insert_attestation(&self, identifier: &Identifier, entry: &AttributesEntry)
        -> Result<()>;

    /// The attestation with the latest `added` (the `identity_attributes`
    /// row); among equal `added`, the later write.
    async fn get_latest_attestation(
        &self,
        identifier: &Identifier,
    ) -> Result<Option<AttributesEntry>>;

    /// All attestations about `identifier`, in write order.
    async fn list_attestations(&self, identifier: &Identifier) -> Result<Vec<AttributesEntry>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Purpose Key Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a purpose key attestation.
    async fn insert_purpose_key(&self, attestation: &PurposeKeyAttestation) -> Result<()>;

    /// All purpose key attestations for `(identifier, purpose)`, in issuance order.
    async fn list_purpose_keys(
        &self,
        identifier: &Identifier,
        purpose: Purpose,
    ) -> Result<Vec<PurposeKeyAttestation>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Policy Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or replace the expression for `(resource, action)`.
    async fn put_policy(&self, resource: &str, action: &str, expression: &[u8]) -> Result<()>;

    /// Get the expression for `(resource, action)`.
    async fn get_policy(&self, resource: &str, action: &str) -> Result<Option<Vec<u8>>>;

    /// Delete the policy for `(resource, action)`. Returns whether one existed.
    async fn delete_policy(&self, resource: &str, action: &str) -> Result<bool>;

    /// List all policies, ordered by resource then action.
    async fn list_policies(&self) -> Result<Vec<PolicyRecord>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Authority Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or replace an authority.
    async fn put_authority(&self, authority: &AuthorityRecord) -> Result<()>;

    /// Get an authority by identifier.
    async fn get_authority(&self, identifier: &Identifier) -> Result<Option<AuthorityRecord>>;

    /// Remove an authority. Returns whether one existed.
    async fn delete_authority(&self, identifier: &Identifier) -> Result<bool>;

    /// List all authorities, sorted by identifier.
    async fn list_authorities(&self) -> Result<Vec<AuthorityRecord>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Vault Records
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or replace a vault record. A default record clears the flag on
    /// every other vault.
    async fn put_vault(&self, vault: &NamedVault) -> Result<()>;

    /// Get a vault record by name.
    async fn get_vault(&self, name: &str) -> Result<Option<NamedVault>>;

    /// The vault flagged as default, if any.
    async fn get_default_vault(&self) -> Result<Option<NamedVault>>;

    /// Make `name` the only default vault. Returns false if it does not exist.
    async fn set_default_vault(&self, name: &str) -> Result<bool>;

    /// Remove a vault record. Returns whether one existed.
    async fn delete_vault(&self, name: &str) -> Result<bool>;

    /// List all vault records, sorted by name.
    async fn list_vaults(&self) -> Result<Vec<NamedVault>>;
}

/// Persistence for sealed vault secrets.
///
/// Handles are opaque strings minted by a vault. Inserts never overwrite:
/// writing an existing handle is a no-op that returns `false`.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Store a sealed signing secret. Returns whether it was newly written.
    async fn put_signing_secret(&self, handle: &str, secret: &StoredSecret) -> Result<bool>;

    /// Get a sealed signing secret.
    async fn get_signing_secret(&self, handle: &str) -> Result<Option<StoredSecret>>;

    /// Delete a signing secret. Returns whether one existed.
    async fn delete_signing_secret(&self, handle: &str) -> Result<bool>;

    /// Store a sealed X25519 secret. Returns whether it was newly written.
    async fn put_x25519_secret(&self, handle: &str, secret: &[u8]) -> Result<bool>;

    /// Get a sealed X25519 secret.
    async fn get_x25519_secret(&self, handle: &str) -> Result<Option<Vec<u8>>>;

    /// Delete an X25519 secret. Returns whether one existed.
    async fn delete_x25519_secret(&self, handle: &str) -> Result<bool>;

    /// All handles of both secret kinds, sorted.
    async fn list_secret_handles(&self) -> Result<Vec<String>>;
}
