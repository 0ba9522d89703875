//! Strong type definitions for Trustgate.
//!
//! Identifiers and timestamps are newtypes to prevent misuse at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::crypto::Ed25519PublicKey;
use crate::error::CoreError;

/// Domain separator for identifier derivation.
const IDENTIFIER_DOMAIN: &[u8] = b"trustgate-identifier-v0:";

/// Length of an identifier in bytes.
pub const IDENTIFIER_LEN: usize = 20;

/// A 20-byte identity identifier.
///
/// Derived once from the genesis public key and stable for the lifetime of the
/// identity, no matter how many times its key rotates. The textual form is
/// `I` followed by 40 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identifier(pub [u8; IDENTIFIER_LEN]);

impl Identifier {
    /// Derive the identifier of an identity from its genesis public key.
    pub fn derive(genesis_key: &Ed25519PublicKey) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(IDENTIFIER_DOMAIN);
        hasher.update(genesis_key.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; IDENTIFIER_LEN];
        bytes.copy_from_slice(&digest.as_bytes()[..IDENTIFIER_LEN]);
        Self(bytes)
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; IDENTIFIER_LEN]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; IDENTIFIER_LEN] {
        &self.0
    }

    /// Convert to hex string (without the `I` prefix).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier(I{})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I{}", self.to_hex())
    }
}

impl FromStr for Identifier {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_part = s
            .strip_prefix('I')
            .ok_or_else(|| CoreError::InvalidIdentifier(s.to_string()))?;
        let bytes =
            hex::decode(hex_part).map_err(|_| CoreError::InvalidIdentifier(s.to_string()))?;
        let arr: [u8; IDENTIFIER_LEN] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidIdentifier(s.to_string()))?;
        Ok(Self(arr))
    }
}

impl AsRef<[u8]> for Identifier {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for Identifier {
    type Error = std::array::TryFromSliceError;

    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; IDENTIFIER_LEN] = slice.try_into()?;
        Ok(Self(arr))
    }
}

/// Unix time in seconds.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// The current wall-clock time.
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Self(secs)
    }

    /// Seconds since the Unix epoch.
    pub const fn as_secs(&self) -> i64 {
        self.0
    }

    /// This timestamp shifted by `secs` seconds.
    pub const fn add_secs(self, secs: i64) -> Self {
        Self(self.0.saturating_add(secs))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Timestamp {
    fn from(secs: i64) -> Self {
        Self(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    #[test]
    fn test_identifier_text_roundtrip() {
        let keypair = Keypair::from_seed(&[0x11; 32]);
        let id = Identifier::derive(&keypair.public_key());
        let text = id.to_string();
        assert!(text.starts_with('I'));
        assert_eq!(text.len(), 41);
        assert_eq!(text.parse::<Identifier>().unwrap(), id);
    }

    #[test]
    fn test_identifier_rejects_malformed() {
        assert!("abc".parse::<Identifier>().is_err());
        assert!("Izz".parse::<Identifier>().is_err());
        assert!("I0011".parse::<Identifier>().is_err());
    }

    #[test]
    fn test_identifier_depends_on_key() {
        let a = Identifier::derive(&Keypair::from_seed(&[1; 32]).public_key());
        let b = Identifier::derive(&Keypair::from_seed(&[2; 32]).public_key());
        assert_ne!(a, b);
    }

    #[test]
    fn test_timestamp_ordering() {
        assert!(Timestamp(10) < Timestamp(11));
        assert_eq!(Timestamp(10).add_secs(5), Timestamp(15));
    }
}
