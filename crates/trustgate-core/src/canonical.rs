//! Canonical CBOR encoding for signed messages.
//!
//! This module implements RFC 8949 Core Deterministic Encoding:
//! - Map keys sorted by encoded byte comparison
//! - Integers use smallest valid encoding
//! - Definite lengths only
//! - No floats (timestamps are i64 seconds)
//!
//! Every signature in the system covers `domain || canonical_cbor(fields)`,
//! so the same logical content yields identical bytes on every platform.

use ciborium::value::Value;

use crate::attributes::{AttributeMap, AttributeValue};
use crate::crypto::{Blake3Hash, Ed25519PublicKey, Ed25519Signature};
use crate::error::CoreError;
use crate::types::{Identifier, Timestamp};

/// Domain separator for rotation-event signatures.
pub const ROTATION_DOMAIN: &[u8] = b"trustgate-rotation-v0:";

/// Domain separator for rotation-event hashes.
pub const EVENT_HASH_DOMAIN: &[u8] = b"trustgate-event-v0:";

/// Domain separator for attribute credential signatures.
pub const CREDENTIAL_DOMAIN: &[u8] = b"trustgate-credential-v0:";

/// Domain separator for purpose-key attestation signatures.
pub const PURPOSE_KEY_DOMAIN: &[u8] = b"trustgate-purpose-key-v0:";

/// Field keys for rotation events. Keys 0-23 encode as single bytes.
mod rotation_keys {
    pub const VERSION: u64 = 0;
    pub const PREVIOUS: u64 = 1;
    pub const PUBLIC_KEY: u64 = 2;
    pub const TIMESTAMP: u64 = 3;
    pub const SIGNATURE: u64 = 4;
}

/// Field keys for attribute credentials.
mod credential_keys {
    pub const VERSION: u64 = 0;
    pub const SUBJECT: u64 = 1;
    pub const ATTRIBUTES: u64 = 2;
    pub const ADDED: u64 = 3;
    pub const EXPIRES: u64 = 4;
    pub const ISSUER: u64 = 5;
}

/// Field keys for purpose-key attestations.
mod purpose_keys {
    pub const VERSION: u64 = 0;
    pub const SUBJECT: u64 = 1;
    pub const PURPOSE: u64 = 2;
    pub const KEY: u64 = 3;
    pub const CREATED: u64 = 4;
    pub const EXPIRES: u64 = 5;
}

fn key(k: u64) -> Value {
    Value::Integer(k.into())
}

fn timestamp_value(ts: Timestamp) -> Value {
    Value::Integer(ts.0.into())
}

fn optional_timestamp_value(ts: Option<Timestamp>) -> Value {
    match ts {
        Some(ts) => timestamp_value(ts),
        None => Value::Null,
    }
}

/// The message signed by a rotation event: `ROTATION_DOMAIN || cbor{version, previous, key, timestamp}`.
pub fn rotation_signing_bytes(
    version: u8,
    previous: &Blake3Hash,
    public_key: &Ed25519PublicKey,
    timestamp: Timestamp,
) -> Result<Vec<u8>, CoreError> {
    let value = Value::Map(vec![
        (key(rotation_keys::VERSION), Value::Integer(version.into())),
        (key(rotation_keys::PREVIOUS), Value::Bytes(previous.0.to_vec())),
        (key(rotation_keys::PUBLIC_KEY), Value::Bytes(public_key.0.to_vec())),
        (key(rotation_keys::TIMESTAMP), timestamp_value(timestamp)),
    ]);
    with_domain(ROTATION_DOMAIN, &value)
}

/// Canonical bytes of a full rotation event, signature included.
///
/// The Blake3 hash of `EVENT_HASH_DOMAIN || these bytes` links the next event.
pub fn rotation_event_bytes(
    version: u8,
    previous: &Blake3Hash,
    public_key: &Ed25519PublicKey,
    timestamp: Timestamp,
    signature: &Ed25519Signature,
) -> Result<Vec<u8>, CoreError> {
    let value = Value::Map(vec![
        (key(rotation_keys::VERSION), Value::Integer(version.into())),
        (key(rotation_keys::PREVIOUS), Value::Bytes(previous.0.to_vec())),
        (key(rotation_keys::PUBLIC_KEY), Value::Bytes(public_key.0.to_vec())),
        (key(rotation_keys::TIMESTAMP), timestamp_value(timestamp)),
        (key(rotation_keys::SIGNATURE), Value::Bytes(signature.0.to_vec())),
    ]);
    with_domain(EVENT_HASH_DOMAIN, &value)
}

/// The message signed by an authority issuing an attribute credential.
pub fn credential_signing_bytes(
    version: u8,
    subject: &Identifier,
    attributes: &AttributeMap,
    added: Timestamp,
    expires: Option<Timestamp>,
    issuer: &Identifier,
) -> Result<Vec<u8>, CoreError> {
    let value = Value::Map(vec![
        (key(credential_keys::VERSION), Value::Integer(version.into())),
        (key(credential_keys::SUBJECT), Value::Bytes(subject.0.to_vec())),
        (key(credential_keys::ATTRIBUTES), attributes_value(attributes)),
        (key(credential_keys::ADDED), timestamp_value(added)),
        (key(credential_keys::EXPIRES), optional_timestamp_value(expires)),
        (key(credential_keys::ISSUER), Value::Bytes(issuer.0.to_vec())),
    ]);
    with_domain(CREDENTIAL_DOMAIN, &value)
}

/// The message signed by an identity attesting one of its purpose keys.
pub fn purpose_key_signing_bytes(
    version: u8,
    subject: &Identifier,
    purpose: u8,
    purpose_key: &[u8; 32],
    created: Timestamp,
    expires: Option<Timestamp>,
) -> Result<Vec<u8>, CoreError> {
    let value = Value::Map(vec![
        (key(purpose_keys::VERSION), Value::Integer(version.into())),
        (key(purpose_keys::SUBJECT), Value::Bytes(subject.0.to_vec())),
        (key(purpose_keys::PURPOSE), Value::Integer(purpose.into())),
        (key(purpose_keys::KEY), Value::Bytes(purpose_key.to_vec())),
        (key(purpose_keys::CREATED), timestamp_value(created)),
        (key(purpose_keys::EXPIRES), optional_timestamp_value(expires)),
    ]);
    with_domain(PURPOSE_KEY_DOMAIN, &value)
}

/// Attribute maps encode as text-keyed maps of `[tag, value]` pairs.
fn attributes_value(attributes: &AttributeMap) -> Value {
    let entries = attributes
        .iter()
        .map(|(name, value)| (Value::Text(name.clone()), attribute_value(value)))
        .collect();
    Value::Map(entries)
}

fn attribute_value(value: &AttributeValue) -> Value {
    let inner = match value {
        AttributeValue::Text(s) => Value::Text(s.clone()),
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::Integer(i) => Value::Integer((*i).into()),
        AttributeValue::Set(items) => {
            Value::Array(items.iter().map(|s| Value::Text(s.clone())).collect())
        }
        AttributeValue::Opaque(b) => Value::Bytes(b.to_vec()),
    };
    Value::Array(vec![Value::Integer(value.tag().into()), inner])
}

fn with_domain(domain: &[u8], value: &Value) -> Result<Vec<u8>, CoreError> {
    let mut buf = domain.to_vec();
    encode_value_to(&mut buf, value)?;
    Ok(buf)
}

/// Encode a CBOR Value to canonical bytes.
pub fn encode_canonical(value: &Value) -> Result<Vec<u8>, CoreError> {
    let mut buf = Vec::new();
    encode_value_to(&mut buf, value)?;
    Ok(buf)
}

/// Recursively encode a CBOR value.
fn encode_value_to(buf: &mut Vec<u8>, value: &Value) -> Result<(), CoreError> {
    match value {
        Value::Integer(i) => encode_integer(buf, *i),
        Value::Bytes(b) => encode_bytes(buf, b),
        Value::Text(s) => encode_text(buf, s),
        Value::Array(arr) => encode_array(buf, arr)?,
        Value::Map(entries) => encode_map_canonical(buf, entries)?,
        Value::Bool(b) => buf.push(if *b { 0xf5 } else { 0xf4 }),
        Value::Null => buf.push(0xf6),
        Value::Float(_) => {
            return Err(CoreError::EncodingError(
                "floats not supported in canonical encoding".into(),
            ))
        }
        _ => {
            return Err(CoreError::EncodingError(
                "unsupported CBOR value type".into(),
            ))
        }
    }
    Ok(())
}

/// Encode a CBOR integer (major types 0 and 1).
fn encode_integer(buf: &mut Vec<u8>, i: ciborium::value::Integer) {
    let n: i128 = i.into();

    if n >= 0 {
        encode_uint(buf, 0, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        let abs = (-1 - n) as u64;
        encode_uint(buf, 1, abs);
    }
}

/// Encode an unsigned integer with the given major type.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffffffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

/// Encode a byte string (major type 2).
fn encode_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    encode_uint(buf, 2, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Encode a text string (major type 3).
fn encode_text(buf: &mut Vec<u8>, s: &str) {
    encode_uint(buf, 3, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

/// Encode an array (major type 4).
fn encode_array(buf: &mut Vec<u8>, arr: &[Value]) -> Result<(), CoreError> {
    encode_uint(buf, 4, arr.len() as u64);
    for item in arr {
        encode_value_to(buf, item)?;
    }
    Ok(())
}

/// Encode a map canonically (major type 5).
///
/// Keys are sorted by their encoded byte comparison.
fn encode_map_canonical(buf: &mut Vec<u8>, entries: &[(Value, Value)]) -> Result<(), CoreError> {
    let mut key_value_pairs: Vec<(Vec<u8>, &Value)> = Vec::with_capacity(entries.len());
    for (k, v) in entries {
        let mut key_buf = Vec::new();
        encode_value_to(&mut key_buf, k)?;
        key_value_pairs.push((key_buf, v));
    }

    key_value_pairs.sort_by(|a, b| a.0.cmp(&b.0));

    encode_uint(buf, 5, key_value_pairs.len() as u64);

    for (key_bytes, value) in key_value_pairs {
        buf.extend_from_slice(&key_bytes);
        encode_value_to(buf, value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    #[test]
    fn test_rotation_bytes_deterministic() {
        let pk = Keypair::from_seed(&[0x42; 32]).public_key();
        let a = rotation_signing_bytes(0, &Blake3Hash::ZERO, &pk, Timestamp(1_700_000_000)).unwrap();
        let b = rotation_signing_bytes(0, &Blake3Hash::ZERO, &pk, Timestamp(1_700_000_000)).unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with(ROTATION_DOMAIN));
    }

    #[test]
    fn test_rotation_bytes_cover_timestamp() {
        let pk = Keypair::from_seed(&[0x42; 32]).public_key();
        let a = rotation_signing_bytes(0, &Blake3Hash::ZERO, &pk, Timestamp(1)).unwrap();
        let b = rotation_signing_bytes(0, &Blake3Hash::ZERO, &pk, Timestamp(2)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_attribute_map_order_independent() {
        let issuer = Identifier::from_bytes([1; 20]);
        let subject = Identifier::from_bytes([2; 20]);

        let mut m1 = AttributeMap::new();
        m1.insert("b".into(), "2".into());
        m1.insert("a".into(), "1".into());
        let mut m2 = AttributeMap::new();
        m2.insert("a".into(), "1".into());
        m2.insert("b".into(), "2".into());

        let x = credential_signing_bytes(0, &subject, &m1, Timestamp(5), None, &issuer).unwrap();
        let y = credential_signing_bytes(0, &subject, &m2, Timestamp(5), None, &issuer).unwrap();
        assert_eq!(x, y);
    }

    #[test]
    fn test_attribute_kinds_are_distinguished() {
        let issuer = Identifier::from_bytes([1; 20]);
        let mut text = AttributeMap::new();
        text.insert("flag".into(), "true".into());
        let mut flag = AttributeMap::new();
        flag.insert("flag".into(), true.into());

        let x = credential_signing_bytes(0, &issuer, &text, Timestamp(0), None, &issuer).unwrap();
        let y = credential_signing_bytes(0, &issuer, &flag, Timestamp(0), None, &issuer).unwrap();
        assert_ne!(x, y);
    }

    #[test]
    fn test_integer_encoding() {
        let mut buf = Vec::new();

        encode_uint(&mut buf, 0, 0);
        assert_eq!(buf, vec![0x00]);

        buf.clear();
        encode_uint(&mut buf, 0, 23);
        assert_eq!(buf, vec![0x17]);

        buf.clear();
        encode_uint(&mut buf, 0, 24);
        assert_eq!(buf, vec![0x18, 24]);

        buf.clear();
        encode_uint(&mut buf, 0, 256);
        assert_eq!(buf, vec![0x19, 0x01, 0x00]);

        buf.clear();
        encode_integer(&mut buf, (-1i64).into());
        assert_eq!(buf, vec![0x20]);
    }

    #[test]
    fn test_map_key_ordering() {
        let mut buf = Vec::new();
        let entries = vec![
            (Value::Integer(8.into()), Value::Integer(80.into())),
            (Value::Integer(0.into()), Value::Integer(0.into())),
            (Value::Integer(5.into()), Value::Integer(50.into())),
        ];
        encode_map_canonical(&mut buf, &entries).unwrap();

        assert_eq!(buf[0], 0xa3);
        assert_eq!(buf[1], 0x00);
        assert_eq!(buf[2], 0x00);
        assert_eq!(buf[3], 0x05);
        assert_eq!(buf[4], 0x18);
        assert_eq!(buf[5], 50);
        assert_eq!(buf[6], 0x08);
    }

    #[test]
    fn test_floats_rejected() {
        assert!(encode_canonical(&Value::Float(1.5)).is_err());
    }
}
