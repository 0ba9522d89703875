//! Attribute attestations, purpose keys and the authorities that issue them.

use std::collections::BTreeSet;
use std::sync::Arc;

use trustgate_core::attributes::names;
use trustgate_core::{
    verify_chain, AttributeCredential, AttributeMap, AttributeValue, AttributesEntry,
    ChangeHistory, Ed25519PublicKey, Identifier, Purpose, PurposeKeyAttestation, Timestamp,
    ValidationError,
};
use trustgate_store::{AuthorityRecord, Store};

use crate::error::{KernelError, Result};
use crate::ledger::IdentityLedger;

/// Attestations about enrolled identities.
///
/// Only attestations from identities that are authorities *now* count when
/// attributes are resolved; removing an authority silently retires everything
/// it attested.
pub struct AttestationStore<S: Store> {
    store: Arc<S>,
    ledger: IdentityLedger<S>,
}

impl<S: Store> Clone for AttestationStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            ledger: self.ledger.clone(),
        }
    }
}

impl<S: Store> AttestationStore<S> {
    pub fn new(store: Arc<S>, ledger: IdentityLedger<S>) -> Self {
        Self { store, ledger }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Authorities
    // ─────────────────────────────────────────────────────────────────────────

    /// Recognize the identity behind `change_history` as an authority.
    ///
    /// The chain is verified before it is trusted. Adding a known authority
    /// again replaces its record, which is how its key history is refreshed.
    pub async fn add_authority(
        &self,
        change_history: ChangeHistory,
        address: impl Into<String>,
    ) -> Result<Identifier> {
        verify_chain(&change_history)?;
        let identifier = change_history
            .identifier()
            .ok_or(ValidationError::EmptyHistory)?;
        let record = AuthorityRecord {
            identifier,
            address: address.into(),
            change_history,
        };
        self.store.put_authority(&record).await?;
        tracing::debug!(authority = %identifier, address = %record.address, "authority added");
        Ok(identifier)
    }

    /// Stop recognizing an authority. Returns whether it was one.
    pub async fn remove_authority(&self, identifier: &Identifier) -> Result<bool> {
        let removed = self.store.delete_authority(identifier).await?;
        if removed {
            tracing::debug!(authority = %identifier, "authority removed");
        }
        Ok(removed)
    }

    pub async fn authority(&self, identifier: &Identifier) -> Result<Option<AuthorityRecord>> {
        Ok(self.store.get_authority(identifier).await?)
    }

    pub async fn is_authority(&self, identifier: &Identifier) -> Result<bool> {
        Ok(self.store.get_authority(identifier).await?.is_some())
    }

    pub async fn authorities(&self) -> Result<Vec<AuthorityRecord>> {
        Ok(self.store.list_authorities().await?)
    }

    /// The current key of an authority. A local ledger entry, if any, is
    /// newer than the history captured when the authority was added.
    async fn authority_key(&self, identifier: &Identifier) -> Result<Ed25519PublicKey> {
        let record = self
            .store
            .get_authority(identifier)
            .await?
            .ok_or(KernelError::UnknownAuthority(*identifier))?;
        let history = match self.store.get_change_history(identifier).await? {
            Some(local) if local.len() >= record.change_history.len() => local,
            _ => record.change_history,
        };
        Ok(history.current_key().ok_or(ValidationError::EmptyHistory)?)
    }

    async fn require_authority(&self, identifier: &Identifier) -> Result<()> {
        if self.is_authority(identifier).await? {
            Ok(())
        } else {
            Err(KernelError::UnknownAuthority(*identifier))
        }
    }

    async fn require_enrolled(&self, identifier: &Identifier) -> Result<()> {
        if self.ledger.is_enrolled(identifier).await? {
            Ok(())
        } else {
            Err(KernelError::UnknownIdentity(*identifier))
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Attributes
    // ─────────────────────────────────────────────────────────────────────────

    /// Record that `attester` vouches for `attributes` of `subject` from
    /// `added` until `expires`.
    pub async fn attest(
        &self,
        subject: &Identifier,
        attributes: AttributeMap,
        expires: Option<Timestamp>,
        attester: &Identifier,
        added: Timestamp,
    ) -> Result<AttributesEntry> {
        self.require_authority(attester).await?;
        self.require_enrolled(subject).await?;
        if matches!(expires, Some(e) if e <= added) {
            return Err(ValidationError::StructuralError(format!(
                "attestation expires at or before it is added ({})",
                added
            ))
            .into());
        }

        let entry = AttributesEntry::new(attributes, added, expires, Some(*attester));
        self.store.insert_attestation(subject, &entry).await?;
        tracing::debug!(%subject, %attester, count = entry.attributes.len(), "attributes attested");
        Ok(entry)
    }

    /// Attest `revoked = true` for `subject`. Policies decide what revocation
    /// means.
    pub async fn revoke(
        &self,
        subject: &Identifier,
        attester: &Identifier,
        at: Timestamp,
    ) -> Result<AttributesEntry> {
        let mut attributes = AttributeMap::new();
        attributes.insert(names::REVOKED.to_owned(), AttributeValue::Bool(true));
        self.attest(subject, attributes, None, attester, at).await
    }

    /// Record a credential signed by an authority.
    ///
    /// The signature is checked against the issuer's current key.
    pub async fn import_credential(&self, credential: &AttributeCredential) -> Result<AttributesEntry> {
        let body = &credential.body;
        let issuer_key = self.authority_key(&body.issuer).await?;
        self.require_enrolled(&body.subject).await?;
        credential.verify(&issuer_key)?;

        let entry = credential.to_entry();
        self.store.insert_attestation(&body.subject, &entry).await?;
        tracing::debug!(subject = %body.subject, issuer = %body.issuer, "credential imported");
        Ok(entry)
    }

    /// Attributes of `subject` in force at `at`.
    ///
    /// Attestations from identities that are no longer authorities, or not
    /// valid at `at`, are skipped. When several attest the same key, the one
    /// with the latest `added` wins; equal `added` goes to the later write.
    pub async fn attributes_of(&self, subject: &Identifier, at: Timestamp) -> Result<AttributeMap> {
        Ok(resolve(&self.valid_attestations(subject, at).await?))
    }

    /// The attestations [`attributes_of`](Self::attributes_of) resolves,
    /// ordered by `added`.
    pub async fn valid_attestations(
        &self,
        subject: &Identifier,
        at: Timestamp,
    ) -> Result<Vec<AttributesEntry>> {
        self.require_enrolled(subject).await?;
        let authorities: BTreeSet<Identifier> = self
            .store
            .list_authorities()
            .await?
            .into_iter()
            .map(|a| a.identifier)
            .collect();

        let mut entries: Vec<AttributesEntry> = self
            .store
            .list_attestations(subject)
            .await?
            .into_iter()
            .filter(|e| matches!(&e.attested_by, Some(a) if authorities.contains(a)))
            .filter(|e| e.is_valid_at(at))
            .collect();
        // Stable, so write order breaks ties.
        entries.sort_by_key(|e| e.added);
        Ok(entries)
    }

    /// Every attestation ever recorded for `subject`, in write order.
    pub async fn attestation_history(&self, subject: &Identifier) -> Result<Vec<AttributesEntry>> {
        self.require_enrolled(subject).await?;
        Ok(self.store.list_attestations(subject).await?)
    }

    /// The attestation with the latest `added` recorded for `subject`,
    /// whether or not it is still valid or its attester still an authority.
    pub async fn latest_attestation(&self, subject: &Identifier) -> Result<Option<AttributesEntry>> {
        self.require_enrolled(subject).await?;
        Ok(self.store.get_latest_attestation(subject).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Purpose Keys
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a purpose key. It must be signed by the subject's current key.
    pub async fn issue_purpose_key(&self, attestation: &PurposeKeyAttestation) -> Result<()> {
        let current = self.ledger.current_key(&attestation.subject).await?;
        attestation.verify(&current)?;
        self.store.insert_purpose_key(attestation).await?;
        tracing::debug!(
            subject = %attestation.subject,
            purpose = %attestation.purpose(),
            "purpose key issued"
        );
        Ok(())
    }

    /// The most recently issued purpose key valid at `at`.
    ///
    /// Keys signed by a key that never belonged to the subject's chain are
    /// ignored.
    pub async fn purpose_key_of(
        &self,
        subject: &Identifier,
        purpose: Purpose,
        at: Timestamp,
    ) -> Result<PurposeKeyAttestation> {
        let history = self.ledger.change_history(subject).await?;
        self.store
            .list_purpose_keys(subject, purpose)
            .await?
            .into_iter()
            .rev()
            .find(|att| {
                att.is_valid_at(at) && history.iter().any(|e| att.verify(&e.public_key).is_ok())
            })
            .ok_or(KernelError::NoPurposeKey {
                identifier: *subject,
                purpose,
            })
    }
}

/// Merge entries ordered by `added`; later entries override earlier keys.
fn resolve(entries: &[AttributesEntry]) -> AttributeMap {
    let mut attributes = AttributeMap::new();
    for entry in entries {
        for (key, value) in &entry.attributes {
            attributes.insert(key.clone(), value.clone());
        }
    }
    attributes
}
