//! # Trustgate Vault
//!
//! Secret custody behind a uniform [`Vault`] trait. Raw key material never
//! leaves a vault; callers hold opaque [`SecretHandle`]s.
//!
//! ## Backends
//!
//! - [`SoftwareVault`] - Secrets sealed with ChaCha20-Poly1305 under a
//!   [`MasterKey`] and persisted through a [`trustgate_store::SecretStore`]
//! - [`RemoteVault`] - Keys held by a remote key-management service, every
//!   call bounded by a timeout and retried per [`RetryPolicy`]
//!
//! ## Ownership
//!
//! A handle is `<vault name>:<key id>`. Only the vault named in the prefix
//! accepts it, and [`VaultRegistry::resolve`] routes handles by that prefix.
//! Handles never move between vaults.

pub mod crypto;
pub mod error;
pub mod handle;
pub mod registry;
pub mod remote;
pub mod software;
pub mod traits;

pub use crypto::{MasterKey, SealedSecret, SharedKey, X25519StaticSecret};
pub use error::{Result, VaultError};
pub use handle::{RequestToken, SecretHandle, SecretType};
pub use registry::{RemoteVaultFactory, SoftwareVaultFactory, VaultFactory, VaultRegistry};
pub use remote::{KmsClient, MemoryKms, RemoteVault, RetryPolicy};
pub use software::{SoftwareVault, SoftwareVaultConfig};
pub use traits::{Vault, VaultKind, VaultPublicKey};
