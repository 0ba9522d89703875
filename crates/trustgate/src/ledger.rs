//! The identity ledger: enrollment and append-only key rotation.
//!
//! Every identity is a hash-linked chain of rotation events. Appends are
//! optimistic: the caller states the chain length it built on, and the store
//! accepts exactly one writer per length.

use std::sync::Arc;

use trustgate_core::{
    verify_chain_for, verify_genesis, verify_rotation, ChangeHistory, Ed25519PublicKey,
    Identifier, RotationEvent, Timestamp, ValidationError,
};
use trustgate_store::{CasResult, EnrollResult, Store};

use crate::error::{ConflictReason, KernelError, Result};

/// Enrollment and rotation over a [`Store`].
pub struct IdentityLedger<S: Store> {
    store: Arc<S>,
}

impl<S: Store> Clone for IdentityLedger<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: Store> IdentityLedger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Enroll an identity from its self-signed genesis event.
    ///
    /// Re-enrolling with the same genesis is a no-op. A different genesis for
    /// an enrolled identifier cannot happen honestly and is rejected.
    pub async fn enroll(&self, genesis: RotationEvent, enrolled_at: Timestamp) -> Result<Identifier> {
        verify_genesis(&genesis)?;
        let history = ChangeHistory::from_genesis(genesis);
        let identifier = history.identifier().ok_or(ValidationError::EmptyHistory)?;

        match self
            .store
            .enroll_identity(&identifier, &history, enrolled_at)
            .await?
        {
            EnrollResult::Inserted => {
                tracing::debug!(%identifier, "identity enrolled");
                Ok(identifier)
            }
            EnrollResult::AlreadyExists(existing) if existing.genesis() == history.genesis() => {
                Ok(identifier)
            }
            EnrollResult::AlreadyExists(_) => Err(ValidationError::StructuralError(format!(
                "{} is enrolled with a different genesis",
                identifier
            ))
            .into()),
        }
    }

    /// Append a rotation built on a chain of `expected_len` events.
    ///
    /// Fails with `RotationConflict` if the chain has moved on or the event is
    /// not signed by the current key; the caller should refetch and retry.
    pub async fn append_rotation(
        &self,
        identifier: &Identifier,
        event: RotationEvent,
        expected_len: usize,
    ) -> Result<ChangeHistory> {
        let history = self.change_history(identifier).await?;
        if history.len() != expected_len {
            return Err(stale(identifier, expected_len, history.len()));
        }
        let head = history
            .current()
            .ok_or(ValidationError::EmptyHistory)?;

        match verify_rotation(head, &event, history.len()) {
            Ok(()) => {}
            Err(ValidationError::SignatureFailed { .. } | ValidationError::BrokenLink { .. }) => {
                tracing::warn!(%identifier, "rotation not signed by current head");
                return Err(KernelError::RotationConflict {
                    identifier: *identifier,
                    reason: ConflictReason::NotCurrentHead,
                });
            }
            Err(e) => return Err(e.into()),
        }

        let updated = history.appended(event);
        match self
            .store
            .compare_and_swap_history(identifier, expected_len, &updated)
            .await?
        {
            CasResult::Swapped => {
                tracing::debug!(%identifier, len = updated.len(), "rotation appended");
                Ok(updated)
            }
            CasResult::Conflict { actual_len } => {
                tracing::warn!(%identifier, expected_len, actual_len, "rotation lost race");
                Err(stale(identifier, expected_len, actual_len))
            }
            CasResult::Missing => Err(KernelError::UnknownIdentity(*identifier)),
        }
    }

    /// The key made current by the last event.
    pub async fn current_key(&self, identifier: &Identifier) -> Result<Ed25519PublicKey> {
        let history = self.change_history(identifier).await?;
        Ok(history
            .current_key()
            .ok_or(ValidationError::EmptyHistory)?)
    }

    /// Replay the whole chain. Read-only.
    pub async fn verify_chain(&self, identifier: &Identifier) -> Result<ChangeHistory> {
        let history = self.change_history(identifier).await?;
        verify_chain_for(identifier, &history)?;
        Ok(history)
    }

    pub async fn change_history(&self, identifier: &Identifier) -> Result<ChangeHistory> {
        self.store
            .get_change_history(identifier)
            .await?
            .ok_or(KernelError::UnknownIdentity(*identifier))
    }

    /// When the identity was enrolled.
    pub async fn enrollment(&self, identifier: &Identifier) -> Result<Timestamp> {
        self.store
            .get_enrollment(identifier)
            .await?
            .ok_or(KernelError::UnknownIdentity(*identifier))
    }

    pub async fn is_enrolled(&self, identifier: &Identifier) -> Result<bool> {
        Ok(self.store.get_change_history(identifier).await?.is_some())
    }

    /// All enrolled identifiers, sorted.
    pub async fn identifiers(&self) -> Result<Vec<Identifier>> {
        Ok(self.store.list_identifiers().await?)
    }
}

fn stale(identifier: &Identifier, expected: usize, actual: usize) -> KernelError {
    KernelError::RotationConflict {
        identifier: *identifier,
        reason: ConflictReason::StaleLength { expected, actual },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trustgate_core::{Keypair, UnsignedRotation};
    use trustgate_store::MemoryStore;

    fn genesis(keypair: &Keypair, ts: i64) -> RotationEvent {
        UnsignedRotation::genesis(keypair.public_key(), Timestamp(ts))
            .sign(keypair)
            .unwrap()
    }

    fn rotation(history: &ChangeHistory, signer: &Keypair, next: &Keypair, ts: i64) -> RotationEvent {
        history
            .next_rotation(next.public_key(), Timestamp(ts))
            .unwrap()
            .sign(signer)
            .unwrap()
    }

    async fn enrolled() -> (IdentityLedger<MemoryStore>, Identifier, Keypair) {
        let ledger = IdentityLedger::new(Arc::new(MemoryStore::new()));
        let k0 = Keypair::generate();
        let id = ledger.enroll(genesis(&k0, 100), Timestamp(100)).await.unwrap();
        (ledger, id, k0)
    }

    #[tokio::test]
    async fn test_enroll_is_idempotent() {
        let ledger = IdentityLedger::new(Arc::new(MemoryStore::new()));
        let k0 = Keypair::generate();
        let event = genesis(&k0, 100);

        let id = ledger.enroll(event.clone(), Timestamp(100)).await.unwrap();
        assert_eq!(ledger.enroll(event, Timestamp(200)).await.unwrap(), id);
        assert_eq!(ledger.enrollment(&id).await.unwrap(), Timestamp(100));
        assert_eq!(ledger.current_key(&id).await.unwrap(), k0.public_key());
        assert_eq!(ledger.identifiers().await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_enroll_rejects_bad_genesis() {
        let ledger = IdentityLedger::new(Arc::new(MemoryStore::new()));
        let k0 = Keypair::generate();
        let forged = UnsignedRotation::genesis(k0.public_key(), Timestamp(1))
            .sign(&Keypair::generate())
            .unwrap();
        assert!(matches!(
            ledger.enroll(forged, Timestamp(1)).await,
            Err(KernelError::InvalidAttestation(_))
        ));
    }

    #[tokio::test]
    async fn test_rotate_and_verify() {
        let (ledger, id, k0) = enrolled().await;
        let k1 = Keypair::generate();
        let history = ledger.change_history(&id).await.unwrap();

        let updated = ledger
            .append_rotation(&id, rotation(&history, &k0, &k1, 200), 1)
            .await
            .unwrap();
        assert_eq!(updated.len(), 2);
        assert_eq!(ledger.current_key(&id).await.unwrap(), k1.public_key());
        ledger.verify_chain(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_rotation_signed_by_stale_key_conflicts() {
        let (ledger, id, k0) = enrolled().await;
        let k1 = Keypair::generate();
        let history = ledger.change_history(&id).await.unwrap();
        let history = ledger
            .append_rotation(&id, rotation(&history, &k0, &k1, 200), 1)
            .await
            .unwrap();

        let k2 = Keypair::generate();
        let err = ledger
            .append_rotation(&id, rotation(&history, &k0, &k2, 300), 2)
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            KernelError::RotationConflict {
                reason: ConflictReason::NotCurrentHead,
                ..
            }
        ));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_stale_expected_len_conflicts() {
        let (ledger, id, k0) = enrolled().await;
        let history = ledger.change_history(&id).await.unwrap();
        let event = rotation(&history, &k0, &Keypair::generate(), 200);

        let err = ledger.append_rotation(&id, event, 2).await.err().unwrap();
        assert!(err.is_retryable());
        assert!(matches!(
            err,
            KernelError::RotationConflict {
                reason: ConflictReason::StaleLength { expected: 2, actual: 1 },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_earlier_timestamp_rejected() {
        let (ledger, id, k0) = enrolled().await;
        let history = ledger.change_history(&id).await.unwrap();
        let event = rotation(&history, &k0, &Keypair::generate(), 99);
        assert!(matches!(
            ledger.append_rotation(&id, event, 1).await,
            Err(KernelError::InvalidAttestation(ValidationError::TimestampRegression { .. }))
        ));
    }

    #[tokio::test]
    async fn test_unknown_identity() {
        let ledger = IdentityLedger::new(Arc::new(MemoryStore::new()));
        let id = Identifier::derive(&Keypair::generate().public_key());
        assert!(matches!(
            ledger.current_key(&id).await,
            Err(KernelError::UnknownIdentity(_))
        ));
        assert!(matches!(
            ledger.verify_chain(&id).await,
            Err(KernelError::UnknownIdentity(_))
        ));
        assert!(!ledger.is_enrolled(&id).await.unwrap());
    }
}
