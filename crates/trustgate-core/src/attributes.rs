//! Attribute values and attestation entries.
//!
//! Attribute maps are schema-flexible, but values are a tagged union so the
//! policy engine can compare them without guessing at encodings. Anything that
//! does not fit a known kind travels as [`AttributeValue::Opaque`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::CoreError;
use crate::types::{Identifier, Timestamp};

/// Well-known attribute names.
pub mod names {
    /// Role of the subject within a project or organisation.
    pub const ROLE: &str = "role";
    /// Project the subject is a member of.
    pub const PROJECT: &str = "project";
    /// Set to `true` by an explicit revocation attestation.
    pub const REVOKED: &str = "revoked";
}

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    /// UTF-8 text.
    Text(String),
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// Unordered set of strings (e.g. group memberships).
    Set(BTreeSet<String>),
    /// Extension attribute with no known interpretation.
    Opaque(Bytes),
}

impl AttributeValue {
    /// Stable tag used by the canonical encoding.
    pub fn tag(&self) -> u8 {
        match self {
            AttributeValue::Text(_) => 0,
            AttributeValue::Bool(_) => 1,
            AttributeValue::Integer(_) => 2,
            AttributeValue::Set(_) => 3,
            AttributeValue::Opaque(_) => 4,
        }
    }

    /// Build a set value from any iterator of strings.
    pub fn set<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AttributeValue::Set(items.into_iter().map(Into::into).collect())
    }

    /// The text content, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Text(s) => write!(f, "{:?}", s),
            AttributeValue::Bool(b) => write!(f, "{}", b),
            AttributeValue::Integer(i) => write!(f, "{}", i),
            AttributeValue::Set(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{:?}", item)?;
                }
                write!(f, "]")
            }
            AttributeValue::Opaque(b) => write!(f, "0x{}", hex::encode(b)),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::Text(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::Text(s)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Bool(b)
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Integer(i)
    }
}

/// Attribute name to value mapping, ordered for deterministic encoding.
pub type AttributeMap = BTreeMap<String, AttributeValue>;

/// One attestation of attributes about an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributesEntry {
    /// The attested attributes.
    pub attributes: AttributeMap,
    /// When the attestation was made.
    pub added: Timestamp,
    /// When the attestation stops being valid, if ever.
    pub expires: Option<Timestamp>,
    /// The authority that attested the attributes.
    pub attested_by: Option<Identifier>,
}

impl AttributesEntry {
    /// Create a new entry.
    pub fn new(
        attributes: AttributeMap,
        added: Timestamp,
        expires: Option<Timestamp>,
        attested_by: Option<Identifier>,
    ) -> Self {
        Self {
            attributes,
            added,
            expires,
            attested_by,
        }
    }

    /// Whether the entry is in force at `at`: `added <= at < expires`.
    pub fn is_valid_at(&self, at: Timestamp) -> bool {
        if at < self.added {
            return false;
        }
        match self.expires {
            Some(expires) => at < expires,
            None => true,
        }
    }

    /// Whether the entry has expired at `at`.
    pub fn is_expired_at(&self, at: Timestamp) -> bool {
        matches!(self.expires, Some(expires) if at >= expires)
    }

    /// Serialize the attribute map to CBOR (the `attributes` column).
    pub fn attributes_to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        let mut buf = Vec::new();
        ciborium::into_writer(&self.attributes, &mut buf)
            .map_err(|e| CoreError::EncodingError(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize an attribute map from CBOR.
    pub fn attributes_from_bytes(bytes: &[u8]) -> Result<AttributeMap, CoreError> {
        ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))
    }
}
