//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;

use trustgate_core::{
    AttributeMap, AttributeValue, ChangeHistory, CredentialBody, Ed25519PublicKey, Identifier,
    Keypair, RotationEvent, Timestamp, UnsignedRotation,
};
use trustgate_store::MemoryStore;
use trustgate_vault::{
    MasterKey, MemoryKms, RemoteVaultFactory, RetryPolicy, SoftwareVaultFactory, VaultKind,
    VaultRegistry,
};

/// An identity driven by in-process keypairs, with its chain kept locally.
pub struct TestIdentity {
    keypairs: Vec<Keypair>,
    history: ChangeHistory,
}

impl TestIdentity {
    /// A fresh identity with a random key, enrolled at `at`.
    pub fn new(at: Timestamp) -> Self {
        Self::from_keypair(Keypair::generate(), at)
    }

    /// Create with a deterministic keypair from seed.
    pub fn with_seed(seed: [u8; 32], at: Timestamp) -> Self {
        Self::from_keypair(Keypair::from_seed(&seed), at)
    }

    fn from_keypair(keypair: Keypair, at: Timestamp) -> Self {
        let genesis = UnsignedRotation::genesis(keypair.public_key(), at)
            .sign(&keypair)
            .expect("genesis encodes");
        Self {
            keypairs: vec![keypair],
            history: ChangeHistory::from_genesis(genesis),
        }
    }

    pub fn identifier(&self) -> Identifier {
        self.history.identifier().expect("history has a genesis")
    }

    /// The self-signed genesis event.
    pub fn genesis(&self) -> RotationEvent {
        self.history.events()[0].clone()
    }

    pub fn history(&self) -> &ChangeHistory {
        &self.history
    }

    /// The keypair that is current in the local chain.
    pub fn current(&self) -> &Keypair {
        self.keypairs.last().expect("at least the genesis key")
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        self.current().public_key()
    }

    /// Rotate to a fresh key at `at`, returning the event to submit.
    pub fn rotate(&mut self, at: Timestamp) -> RotationEvent {
        let next = Keypair::generate();
        let event = self
            .history
            .next_rotation(next.public_key(), at)
            .and_then(|unsigned| unsigned.sign(self.current()))
            .expect("rotation encodes");
        self.history = self.history.appended(event.clone());
        self.keypairs.push(next);
        event
    }

    /// A rotation on top of the local chain, signed by `signer`, that is not
    /// applied locally.
    pub fn rotation_signed_by(&self, signer: &Keypair, at: Timestamp) -> RotationEvent {
        self.history
            .next_rotation(Keypair::generate().public_key(), at)
            .and_then(|unsigned| unsigned.sign(signer))
            .expect("rotation encodes")
    }

    /// Every keypair this identity has used, oldest first.
    pub fn keypairs(&self) -> &[Keypair] {
        &self.keypairs
    }

    /// Sign a credential about `subject` as this identity.
    pub fn credential(
        &self,
        subject: Identifier,
        attributes: AttributeMap,
        added: Timestamp,
        expires: Option<Timestamp>,
    ) -> trustgate_core::AttributeCredential {
        CredentialBody {
            subject,
            attributes,
            added,
            expires,
            issuer: self.identifier(),
        }
        .sign(self.current())
        .expect("credential encodes")
    }
}

/// Create several identities with deterministic keys.
pub fn identity_fixtures(count: usize, at: Timestamp) -> Vec<TestIdentity> {
    (0..count)
        .map(|i| {
            let mut seed = [0u8; 32];
            seed[0] = i as u8;
            seed[1] = 0x7a;
            TestIdentity::with_seed(seed, at)
        })
        .collect()
}

/// Build an attribute map from text pairs.
pub fn text_attributes(pairs: &[(&str, &str)]) -> AttributeMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), AttributeValue::from(*v)))
        .collect()
}

/// A registry that opens software vaults over `store` and remote vaults over
/// `kms`.
pub fn vault_registry(store: Arc<MemoryStore>, kms: Arc<MemoryKms>, retry: RetryPolicy) -> VaultRegistry {
    VaultRegistry::new()
        .with_factory(
            VaultKind::Software,
            Arc::new(SoftwareVaultFactory::new(store, MasterKey::generate())),
        )
        .with_factory(VaultKind::AwsKms, Arc::new(RemoteVaultFactory::new(kms, retry)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use trustgate_core::verify_chain;

    #[test]
    fn test_rotations_form_valid_chain() {
        let mut identity = TestIdentity::new(Timestamp(10));
        let id = identity.identifier();
        identity.rotate(Timestamp(20));
        identity.rotate(Timestamp(20));

        assert_eq!(identity.history().len(), 3);
        assert_eq!(identity.identifier(), id);
        assert_eq!(identity.keypairs().len(), 3);
        verify_chain(identity.history()).unwrap();
    }

    #[test]
    fn test_fixtures_are_distinct_and_stable() {
        let a = identity_fixtures(3, Timestamp(1));
        let b = identity_fixtures(3, Timestamp(1));
        assert_ne!(a[0].identifier(), a[1].identifier());
        assert_ne!(a[1].identifier(), a[2].identifier());
        assert_eq!(a[2].identifier(), b[2].identifier());
    }

    #[test]
    fn test_credential_verifies() {
        let issuer = TestIdentity::new(Timestamp(1));
        let subject = TestIdentity::new(Timestamp(1));
        let credential = issuer.credential(
            subject.identifier(),
            text_attributes(&[("role", "admin")]),
            Timestamp(5),
            None,
        );
        credential.verify(&issuer.public_key()).unwrap();
    }
}
