//! # Trustgate Store
//!
//! Storage abstraction for Trustgate. Provides trait-based interfaces for
//! identity, trust and secret persistence with SQLite and in-memory
//! implementations.
//!
//! ## Key Types
//!
//! - [`Store`] - Identities, attestations, purpose keys, policies, authorities, vault records
//! - [`SecretStore`] - Sealed vault secrets addressed by handle
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`CasResult`] - Outcome of an optimistic history update
//!
//! ## Usage
//!
//! ```rust,no_run
//! use trustgate_store::{SqliteStore, Store};
//!
//! async fn example() -> trustgate_store::Result<()> {
//!     let store = SqliteStore::open("trust.db")?;
//!     for identifier in store.list_identifiers().await? {
//!         println!("{}", identifier);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Compare-and-swap appends**: a history is replaced only if its stored
//!   length matches what the writer read, so one writer wins per length
//! - **Write-once enrollment**: enrolling twice returns the existing history
//! - **Idempotent secrets**: inserting an existing handle changes nothing

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{
    AuthorityRecord, CasResult, EnrollResult, NamedVault, PolicyRecord, SecretStore, Store,
    StoredSecret,
};
