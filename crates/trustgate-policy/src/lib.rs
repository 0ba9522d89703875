//! # Trustgate Policy
//!
//! Boolean policy expressions over named facts, stored per exact
//! (resource, action) pair and evaluated with default deny.
//!
//! ## Key Types
//!
//! - [`Expr`] - Predicate tree with a CBOR blob form and an s-expression text form
//! - [`Facts`] - Named values (`subject.<attr>`, `subject.identifier`,
//!   `resource.id`, `action.id`) an expression is evaluated against
//! - [`PolicyEngine`] - Persists policies and evaluates requests
//! - [`Verdict`] - The [`Effect`] plus the version of the policy used
//!
//! ## Design Notes
//!
//! - Evaluation is total and deterministic. Unknown facts are absent and
//!   make comparisons false; `not` may turn that into a match.
//! - `and`/`or` evaluate left to right and stop early.
//! - A policy's version is the Blake3 hash of its stored blob, so identical
//!   expressions share a version.

pub mod engine;
pub mod error;
pub mod eval;
pub mod expr;
pub mod facts;
pub mod parse;

pub use engine::{Effect, Policy, PolicyEngine, Verdict};
pub use error::{PolicyError, Result};
pub use eval::evaluate;
pub use expr::{Expr, Literal, MAX_DEPTH};
pub use facts::{names, Facts};
pub use parse::parse;
