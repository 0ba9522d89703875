//! Attribute credentials: attestations signed by an authority.
//!
//! A credential can travel between nodes. The receiving side checks the
//! signature against the issuer's current ledger key before recording it.

use serde::{Deserialize, Serialize};

use crate::attributes::{AttributeMap, AttributesEntry};
use crate::canonical::credential_signing_bytes;
use crate::crypto::{Ed25519PublicKey, Ed25519Signature, Keypair};
use crate::error::{CoreError, ValidationError};
use crate::types::{Identifier, Timestamp};

/// Current credential schema version.
pub const CREDENTIAL_VERSION: u8 = 0;

/// The unsigned content of a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialBody {
    pub subject: Identifier,
    pub attributes: AttributeMap,
    pub added: Timestamp,
    pub expires: Option<Timestamp>,
    pub issuer: Identifier,
}

impl CredentialBody {
    /// The bytes the issuer signs.
    pub fn signing_message(&self) -> Result<Vec<u8>, CoreError> {
        credential_signing_bytes(
            CREDENTIAL_VERSION,
            &self.subject,
            &self.attributes,
            self.added,
            self.expires,
            &self.issuer,
        )
    }

    /// Attach a signature produced elsewhere.
    pub fn with_signature(self, signature: Ed25519Signature) -> AttributeCredential {
        AttributeCredential {
            version: CREDENTIAL_VERSION,
            body: self,
            signature,
        }
    }

    /// Sign with an in-process keypair.
    pub fn sign(self, keypair: &Keypair) -> Result<AttributeCredential, CoreError> {
        let message = self.signing_message()?;
        let signature = keypair.sign(&message);
        Ok(self.with_signature(signature))
    }
}

/// A signed attribute attestation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeCredential {
    pub version: u8,
    pub body: CredentialBody,
    pub signature: Ed25519Signature,
}

impl AttributeCredential {
    /// Verify the issuer's signature.
    pub fn verify(&self, issuer_key: &Ed25519PublicKey) -> Result<(), ValidationError> {
        if self.version != CREDENTIAL_VERSION {
            return Err(ValidationError::StructuralError(format!(
                "unsupported credential version {}",
                self.version
            )));
        }
        let message = self.body.signing_message()?;
        issuer_key
            .verify(&message, &self.signature)
            .map_err(|_| ValidationError::AttestationSignature)
    }

    /// The attestation entry this credential records.
    pub fn to_entry(&self) -> AttributesEntry {
        AttributesEntry::new(
            self.body.attributes.clone(),
            self.body.added,
            self.body.expires,
            Some(self.body.issuer),
        )
    }

    /// Serialize to CBOR.
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

#[cfg(test)]
mod tests {
    use super::*;

    fn body(issuer: &Keypair) -> CredentialBody {
        let mut attributes = AttributeMap::new();
        attributes.insert("role".into(), "admin".into());
        CredentialBody {
            subject: Identifier::from_bytes([4; 20]),
            attributes,
            added: Timestamp(10),
            expires: Some(Timestamp(20)),
            issuer: Identifier::derive(&issuer.public_key()),
        }
    }

    #[test]
    fn test_credential_verifies_against_issuer() {
        let issuer = Keypair::from_seed(&[5; 32]);
        let cred = body(&issuer).sign(&issuer).unwrap();
        cred.verify(&issuer.public_key()).unwrap();

        let entry = cred.to_entry();
        assert_eq!(entry.attested_by, Some(cred.body.issuer));
        assert_eq!(entry.expires, Some(Timestamp(20)));
    }

    #[test]
    fn test_tampered_attributes_rejected() {
        let issuer = Keypair::from_seed(&[5; 32]);
        let mut cred = body(&issuer).sign(&issuer).unwrap();
        cred.body
            .attributes
            .insert("role".into(), "superuser".into());
        assert!(cred.verify(&issuer.public_key()).is_err());
    }

    #[test]
    fn test_credential_bytes_roundtrip() {
        let issuer = Keypair::from_seed(&[5; 32]);
        let cred = body(&issuer).sign(&issuer).unwrap();
        let back = AttributeCredential::from_bytes(&cred.to_bytes().unwrap()).unwrap();
        assert_eq!(back, cred);
    }
}
