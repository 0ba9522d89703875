//! # Trustgate Testkit
//!
//! Testing utilities for Trustgate.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: identities driven by in-process keypairs, attribute
//!   helpers, and a vault registry wired to in-memory backends
//! - **Generators**: Proptest strategies for chains, chain mutations,
//!   attributes, policy expressions and facts
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use trustgate_core::verify_chain;
//! use trustgate_testkit::generators::{chain_from_params, ChainParams};
//!
//! proptest! {
//!     #[test]
//!     fn chains_verify(params: ChainParams) {
//!         prop_assert!(verify_chain(&chain_from_params(&params)).is_ok());
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust
//! use trustgate_core::Timestamp;
//! use trustgate_testkit::fixtures::TestIdentity;
//!
//! let mut alice = TestIdentity::new(Timestamp(100));
//! let rotation = alice.rotate(Timestamp(200));
//! assert_eq!(alice.history().len(), 2);
//! assert_eq!(rotation.public_key, alice.public_key());
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{identity_fixtures, text_attributes, vault_registry, TestIdentity};
pub use generators::{chain_from_params, ChainMutation, ChainParams};
