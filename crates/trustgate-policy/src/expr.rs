//! Policy expressions: boolean predicate trees over named facts.
//!
//! Leaves compare one fact against literals; `and`, `or` and `not` combine
//! them. The stored form is CBOR; the textual form is an s-expression:
//!
//! ```text
//! (and (= subject.role "admin")
//!      (not (= subject.revoked true))
//!      (in action.id "read" "list"))
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use trustgate_core::Blake3Hash;

use crate::error::{PolicyError, Result};

/// Deepest nesting of expressions accepted from text, blobs or callers.
pub const MAX_DEPTH: usize = 128;

/// A literal a fact is compared against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Literal {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl From<&str> for Literal {
    fn from(s: &str) -> Self {
        Literal::Str(s.to_owned())
    }
}

impl From<String> for Literal {
    fn from(s: String) -> Self {
        Literal::Str(s)
    }
}

impl From<i64> for Literal {
    fn from(i: i64) -> Self {
        Literal::Int(i)
    }
}

impl From<bool> for Literal {
    fn from(b: bool) -> Self {
        Literal::Bool(b)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Str(s) => {
                f.write_str("\"")?;
                for c in s.chars() {
                    match c {
                        '"' => f.write_str("\\\"")?,
                        '\\' => f.write_str("\\\\")?,
                        c => write!(f, "{}", c)?,
                    }
                }
                f.write_str("\"")
            }
            Literal::Int(i) => write!(f, "{}", i),
            Literal::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// A policy expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expr {
    /// `true` / `false`.
    Const(bool),
    /// `(= fact literal)`: the fact equals the literal.
    Eq(String, Literal),
    /// `(in fact literal...)`: the fact is one of the literals, or a set-valued
    /// fact shares at least one element with them.
    In(String, Vec<Literal>),
    /// `(contains fact literal)`: a set-valued fact contains the literal.
    Contains(String, Literal),
    /// `(present fact)`: the fact exists.
    Present(String),
    /// `(and expr...)`: all hold; stops at the first false.
    And(Vec<Expr>),
    /// `(or expr...)`: any holds; stops at the first true.
    Or(Vec<Expr>),
    /// `(not expr)`.
    Not(Box<Expr>),
}

impl Expr {
    pub fn eq(fact: impl Into<String>, literal: impl Into<Literal>) -> Self {
        Expr::Eq(fact.into(), literal.into())
    }

    pub fn is_in<L: Into<Literal>>(
        fact: impl Into<String>,
        literals: impl IntoIterator<Item = L>,
    ) -> Self {
        Expr::In(fact.into(), literals.into_iter().map(Into::into).collect())
    }

    pub fn contains(fact: impl Into<String>, literal: impl Into<Literal>) -> Self {
        Expr::Contains(fact.into(), literal.into())
    }

    pub fn present(fact: impl Into<String>) -> Self {
        Expr::Present(fact.into())
    }

    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Self {
        Expr::And(exprs.into_iter().collect())
    }

    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Self {
        Expr::Or(exprs.into_iter().collect())
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(expr: Expr) -> Self {
        Expr::Not(Box::new(expr))
    }

    /// Number of expressions on the longest path from the root, counting both
    /// ends. Computed without recursion.
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(self, 1)];
        while let Some((expr, depth)) = stack.pop() {
            deepest = deepest.max(depth);
            match expr {
                Expr::And(exprs) | Expr::Or(exprs) => {
                    stack.extend(exprs.iter().map(|e| (e, depth + 1)));
                }
                Expr::Not(inner) => stack.push((inner.as_ref(), depth + 1)),
                _ => {}
            }
        }
        deepest
    }

    /// Reject expressions nested deeper than [`MAX_DEPTH`].
    pub fn check_depth(&self) -> Result<()> {
        if self.depth() > MAX_DEPTH {
            return Err(PolicyError::TooDeep { max: MAX_DEPTH });
        }
        Ok(())
    }

    /// Serialize to the stored blob form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| PolicyError::Encode(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from the stored blob form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let expr: Expr =
            ciborium::from_reader(bytes).map_err(|e| PolicyError::Decode(e.to_string()))?;
        expr.check_depth()?;
        Ok(expr)
    }

    /// The policy version: Blake3 of the stored blob.
    pub fn version(&self) -> Result<Blake3Hash> {
        Ok(Blake3Hash::hash(&self.to_bytes()?))
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, head: &str, items: &[T]) -> fmt::Result {
    write!(f, "({}", head)?;
    for item in items {
        write!(f, " {}", item)?;
    }
    f.write_str(")")
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(b) => write!(f, "{}", b),
            Expr::Eq(fact, lit) => write!(f, "(= {} {})", fact, lit),
            Expr::In(fact, lits) => write_list(f, &format!("in {}", fact), lits),
            Expr::Contains(fact, lit) => write!(f, "(contains {} {})", fact, lit),
            Expr::Present(fact) => write!(f, "(present {})", fact),
            Expr::And(exprs) => write_list(f, "and", exprs),
            Expr::Or(exprs) => write_list(f, "or", exprs),
            Expr::Not(expr) => write!(f, "(not {})", expr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let expr = Expr::and([
            Expr::eq("subject.role", "admin"),
            Expr::not(Expr::present("subject.revoked")),
            Expr::is_in("action.id", ["read", "list"]),
        ]);
        assert_eq!(
            expr.to_string(),
            r#"(and (= subject.role "admin") (not (present subject.revoked)) (in action.id "read" "list"))"#
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(Literal::from(r#"a"b\c"#).to_string(), r#""a\"b\\c""#);
    }

    #[test]
    fn test_version_tracks_content() {
        let a = Expr::eq("subject.role", "admin");
        let b = Expr::eq("subject.role", "ops");
        assert_eq!(a.version().unwrap(), a.clone().version().unwrap());
        assert_ne!(a.version().unwrap(), b.version().unwrap());
        assert_eq!(Expr::from_bytes(&a.to_bytes().unwrap()).unwrap(), a);
    }

    fn nested_not(depth: usize) -> Expr {
        (1..depth).fold(Expr::Const(true), |e, _| Expr::not(e))
    }

    #[test]
    fn test_depth() {
        assert_eq!(Expr::Const(true).depth(), 1);
        assert_eq!(Expr::and([]).depth(), 1);
        assert_eq!(
            Expr::or([Expr::present("a"), Expr::not(Expr::and([Expr::Const(false)]))]).depth(),
            4
        );
        assert_eq!(nested_not(MAX_DEPTH).depth(), MAX_DEPTH);
    }

    #[test]
    fn test_deep_blob_rejected() {
        assert!(Expr::from_bytes(&nested_not(MAX_DEPTH).to_bytes().unwrap()).is_ok());
        let deep = nested_not(MAX_DEPTH + 20).to_bytes().unwrap();
        assert!(Expr::from_bytes(&deep).is_err());
    }

    #[test]
    fn test_garbage_blob_rejected() {
        assert!(matches!(
            Expr::from_bytes(&[0xff, 0x00]),
            Err(PolicyError::Decode(_))
        ));
    }
}
