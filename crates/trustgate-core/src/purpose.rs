//! Purpose keys: keys an identity attests for exactly one use.
//!
//! A purpose key attestation binds a signing key or a key-exchange key to an
//! identity. It is signed by the identity's current ledger key at issuance.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::canonical::purpose_key_signing_bytes;
use crate::crypto::{Ed25519PublicKey, Ed25519Signature, Keypair, X25519PublicKey};
use crate::error::{CoreError, ValidationError};
use crate::types::{Identifier, Timestamp};

/// Current purpose-key attestation schema version.
pub const PURPOSE_KEY_VERSION: u8 = 0;

/// The single use a purpose key is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Purpose {
    /// Signing credentials and other statements.
    Signing = 1,
    /// Key agreement for secure channels.
    KeyExchange = 2,
}

impl Purpose {
    /// Convert to the wire tag.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Convert from the wire tag.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Purpose::Signing),
            2 => Some(Purpose::KeyExchange),
            _ => None,
        }
    }

    /// Name stored in the `purpose` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Signing => "signing",
            Purpose::KeyExchange => "key_exchange",
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Purpose {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signing" => Ok(Purpose::Signing),
            "key_exchange" => Ok(Purpose::KeyExchange),
            other => Err(CoreError::DecodingError(format!("unknown purpose: {}", other))),
        }
    }
}

/// The public half of a purpose key. The variant fixes the purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurposePublicKey {
    Signing(Ed25519PublicKey),
    KeyExchange(X25519PublicKey),
}

impl PurposePublicKey {
    /// The purpose this key is restricted to.
    pub fn purpose(&self) -> Purpose {
        match self {
            PurposePublicKey::Signing(_) => Purpose::Signing,
            PurposePublicKey::KeyExchange(_) => Purpose::KeyExchange,
        }
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        match self {
            PurposePublicKey::Signing(k) => k.as_bytes(),
            PurposePublicKey::KeyExchange(k) => k.as_bytes(),
        }
    }
}

/// A signed statement that `subject` controls `purpose_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurposeKeyAttestation {
    pub version: u8,
    pub subject: Identifier,
    pub purpose_key: PurposePublicKey,
    pub created: Timestamp,
    pub expires: Option<Timestamp>,
    /// Signature by the subject's ledger key current at issuance.
    pub signature: Ed25519Signature,
}

impl PurposeKeyAttestation {
    /// Start an unsigned attestation.
    pub fn builder(
        subject: Identifier,
        purpose_key: PurposePublicKey,
        created: Timestamp,
    ) -> PurposeKeyAttestationBuilder {
        PurposeKeyAttestationBuilder {
            subject,
            purpose_key,
            created,
            expires: None,
        }
    }

    /// The purpose of the attested key.
    pub fn purpose(&self) -> Purpose {
        self.purpose_key.purpose()
    }

    /// The bytes covered by `signature`.
    pub fn signing_message(&self) -> Result<Vec<u8>, CoreError> {
        purpose_key_signing_bytes(
            self.version,
            &self.subject,
            self.purpose().to_u8(),
            self.purpose_key.as_bytes(),
            self.created,
            self.expires,
        )
    }

    /// Verify the signature against an identity key.
    pub fn verify(&self, identity_key: &Ed25519PublicKey) -> Result<(), ValidationError> {
        let message = self.signing_message()?;
        identity_key
            .verify(&message, &self.signature)
            .map_err(|_| ValidationError::AttestationSignature)
    }

    /// Whether the attestation is in force at `at`.
    pub fn is_valid_at(&self, at: Timestamp) -> bool {
        if at < self.created {
            return false;
        }
        match self.expires {
            Some(expires) => at < expires,
            None => true,
        }
    }

    /// Serialize to CBOR (the `purpose_key_attestation` column).
    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| CoreError::EncodingError(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))
    }
}

/// Builder for [`PurposeKeyAttestation`].
#[derive(Debug, Clone)]
pub struct PurposeKeyAttestationBuilder {
    subject: Identifier,
    purpose_key: PurposePublicKey,
    created: Timestamp,
    expires: Option<Timestamp>,
}

impl PurposeKeyAttestationBuilder {
    /// Set an expiry.
    pub fn expires(mut self, expires: Timestamp) -> Self {
        self.expires = Some(expires);
        self
    }

    /// The bytes that must be signed by the identity key.
    pub fn signing_message(&self) -> Result<Vec<u8>, CoreError> {
        purpose_key_signing_bytes(
            PURPOSE_KEY_VERSION,
            &self.subject,
            self.purpose_key.purpose().to_u8(),
            self.purpose_key.as_bytes(),
            self.created,
            self.expires,
        )
    }

    /// Attach a signature produced elsewhere.
    pub fn with_signature(self, signature: Ed25519Signature) -> PurposeKeyAttestation {
        PurposeKeyAttestation {
            version: PURPOSE_KEY_VERSION,
            subject: self.subject,
            purpose_key: self.purpose_key,
            created: self.created,
            expires: self.expires,
            signature,
        }
    }

    /// Sign with an in-process keypair.
    pub fn sign(self, keypair: &Keypair) -> Result<PurposeKeyAttestation, CoreError> {
        let message = self.signing_message()?;
        let signature = keypair.sign(&message);
        Ok(self.with_signature(signature))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attestation(identity: &Keypair, expires: Option<i64>) -> PurposeKeyAttestation {
        let subject = Identifier::derive(&identity.public_key());
        let key = Keypair::from_seed(&[7; 32]).public_key();
        let mut builder =
            PurposeKeyAttestation::builder(subject, PurposePublicKey::Signing(key), Timestamp(100));
        if let Some(e) = expires {
            builder = builder.expires(Timestamp(e));
        }
        builder.sign(identity).unwrap()
    }

    #[test]
    fn test_sign_and_verify() {
        let identity = Keypair::from_seed(&[1; 32]);
        let att = attestation(&identity, None);
        assert_eq!(att.purpose(), Purpose::Signing);
        att.verify(&identity.public_key()).unwrap();
        assert!(att
            .verify(&Keypair::from_seed(&[2; 32]).public_key())
            .is_err());
    }

    #[test]
    fn test_expiry_is_covered_by_signature() {
        let identity = Keypair::from_seed(&[1; 32]);
        let mut att = attestation(&identity, Some(200));
        att.expires = None;
        assert!(att.verify(&identity.public_key()).is_err());
    }

    #[test]
    fn test_validity_window() {
        let identity = Keypair::from_seed(&[1; 32]);
        let att = attestation(&identity, Some(200));
        assert!(!att.is_valid_at(Timestamp(99)));
        assert!(att.is_valid_at(Timestamp(150)));
        assert!(!att.is_valid_at(Timestamp(200)));
    }

    #[test]
    fn test_purpose_names() {
        for p in [Purpose::Signing, Purpose::KeyExchange] {
            assert_eq!(p.as_str().parse::<Purpose>().unwrap(), p);
            assert_eq!(Purpose::from_u8(p.to_u8()), Some(p));
        }
        assert!("other".parse::<Purpose>().is_err());
    }
}
