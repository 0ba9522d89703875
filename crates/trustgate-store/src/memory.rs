//! In-memory implementation of the store traits.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use trustgate_core::{
    AttributesEntry, ChangeHistory, Identifier, Purpose, PurposeKeyAttestation, Timestamp,
};

use crate::error::{Result, StoreError};
use crate::traits::{
    AuthorityRecord, CasResult, EnrollResult, NamedVault, PolicyRecord, SecretStore, Store,
    StoredSecret,
};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    identities: BTreeMap<Identifier, ChangeHistory>,
    enrollments: BTreeMap<Identifier, Timestamp>,
    /// Attestation history per identity, in write order.
    attestations: BTreeMap<Identifier, Vec<AttributesEntry>>,
    purpose_keys: BTreeMap<(Identifier, Purpose), Vec<PurposeKeyAttestation>>,
    policies: BTreeMap<(String, String), Vec<u8>>,
    authorities: BTreeMap<Identifier, AuthorityRecord>,
    vaults: BTreeMap<String, NamedVault>,
    signing_secrets: BTreeMap<String, StoredSecret>,
    x25519_secrets: BTreeMap<String, Vec<u8>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn enroll_identity(
        &self,
        identifier: &Identifier,
        history: &ChangeHistory,
        enrolled_at: Timestamp,
    ) -> Result<EnrollResult> {
        let mut inner = self.write()?;

        if let Some(existing) = inner.identities.get(identifier) {
            return Ok(EnrollResult::AlreadyExists(existing.clone()));
        }

        inner.identities.insert(*identifier, history.clone());
        inner.enrollments.insert(*identifier, enrolled_at);
        Ok(EnrollResult::Inserted)
    }

    async fn get_change_history(&self, identifier: &Identifier) -> Result<Option<ChangeHistory>> {
        Ok(self.read()?.identities.get(identifier).cloned())
    }

    async fn compare_and_swap_history(
        &self,
        identifier: &Identifier,
        expected_len: usize,
        history: &ChangeHistory,
    ) -> Result<CasResult> {
        let mut inner = self.write()?;

        let Some(stored) = inner.identities.get_mut(identifier) else {
            return Ok(CasResult::Missing);
        };
        if stored.len() != expected_len {
            return Ok(CasResult::Conflict {
                actual_len: stored.len(),
            });
        }
        *stored = history.clone();
        Ok(CasResult::Swapped)
    }

    async fn get_enrollment(&self, identifier: &Identifier) -> Result<Option<Timestamp>> {
        Ok(self.read()?.enrollments.get(identifier).copied())
    }

    async fn list_identifiers(&self) -> Result<Vec<Identifier>> {
        Ok(self.read()?.identities.keys().copied().collect())
    }

    async fn insert_attestation(
        &self,
        identifier: &Identifier,
        entry: &AttributesEntry,
    ) -> Result<()> {
        self.write()?
            .attestations
            .entry(*identifier)
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn get_latest_attestation(
        &self,
        identifier: &Identifier,
    ) -> Result<Option<AttributesEntry>> {
        Ok(self
            .read()?
            .attestations
            .get(identifier)
            .and_then(|history| history.iter().max_by_key(|entry| entry.added).cloned()))
    }

    async fn list_attestations(&self, identifier: &Identifier) -> Result<Vec<AttributesEntry>> {
        Ok(self
            .read()?
            .attestations
            .get(identifier)
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_purpose_key(&self, attestation: &PurposeKeyAttestation) -> Result<()> {
        self.write()?
            .purpose_keys
            .entry((attestation.subject, attestation.purpose()))
            .or_default()
            .push(attestation.clone());
        Ok(())
    }

    async fn list_purpose_keys(
        &self,
        identifier: &Identifier,
        purpose: Purpose,
    ) -> Result<Vec<PurposeKeyAttestation>> {
        Ok(self
            .read()?
            .purpose_keys
            .get(&(*identifier, purpose))
            .cloned()
            .unwrap_or_default())
    }

    async fn put_policy(&self, resource: &str, action: &str, expression: &[u8]) -> Result<()> {
        self.write()?
            .policies
            .insert((resource.to_owned(), action.to_owned()), expression.to_vec());
        Ok(())
    }

    async fn get_policy(&self, resource: &str, action: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .read()?
            .policies
            .get(&(resource.to_owned(), action.to_owned()))
            .cloned())
    }

    async fn delete_policy(&self, resource: &str, action: &str) -> Result<bool> {
        Ok(self
            .write()?
            .policies
            .remove(&(resource.to_owned(), action.to_owned()))
            .is_some())
    }

    async fn list_policies(&self) -> Result<Vec<PolicyRecord>> {
        Ok(self
            .read()?
            .policies
            .iter()
            .map(|((resource, action), expression)| PolicyRecord {
                resource: resource.clone(),
                action: action.clone(),
                expression: expression.clone(),
            })
            .collect())
    }

    async fn put_authority(&self, authority: &AuthorityRecord) -> Result<()> {
        self.write()?
            .authorities
            .insert(authority.identifier, authority.clone());
        Ok(())
    }

    async fn get_authority(&self, identifier: &Identifier) -> Result<Option<AuthorityRecord>> {
        Ok(self.read()?.authorities.get(identifier).cloned())
    }

    async fn delete_authority(&self, identifier: &Identifier) -> Result<bool> {
        Ok(self.write()?.authorities.remove(identifier).is_some())
    }

    async fn list_authorities(&self) -> Result<Vec<AuthorityRecord>> {
        Ok(self.read()?.authorities.values().cloned().collect())
    }

    async fn put_vault(&self, vault: &NamedVault) -> Result<()> {
        let mut inner = self.write()?;
        if vault.is_default {
            for other in inner.vaults.values_mut() {
                other.is_default = false;
            }
        }
        inner.vaults.insert(vault.name.clone(), vault.clone());
        Ok(())
    }

    async fn get_vault(&self, name: &str) -> Result<Option<NamedVault>> {
        Ok(self.read()?.vaults.get(name).cloned())
    }

    async fn get_default_vault(&self) -> Result<Option<NamedVault>> {
        Ok(self
            .read()?
            .vaults
            .values()
            .find(|v| v.is_default)
            .cloned())
    }

    async fn set_default_vault(&self, name: &str) -> Result<bool> {
        let mut inner = self.write()?;
        if !inner.vaults.contains_key(name) {
            return Ok(false);
        }
        for vault in inner.vaults.values_mut() {
            vault.is_default = vault.name == name;
        }
        Ok(true)
    }

    async fn delete_vault(&self, name: &str) -> Result<bool> {
        Ok(self.write()?.vaults.remove(name).is_some())
    }

    async fn list_vaults(&self) -> Result<Vec<NamedVault>> {
        Ok(self.read()?.vaults.values().cloned().collect())
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn put_signing_secret(&self, handle: &str, secret: &StoredSecret) -> Result<bool> {
        let mut inner = self.write()?;
        if inner.signing_secrets.contains_key(handle) {
            return Ok(false);
        }
        inner
            .signing_secrets
            .insert(handle.to_owned(), secret.clone());
        Ok(true)
    }

    async fn get_signing_secret(&self, handle: &str) -> Result<Option<StoredSecret>> {
        Ok(self.read()?.signing_secrets.get(handle).cloned())
    }

    async fn delete_signing_secret(&self, handle: &str) -> Result<bool> {
        Ok(self.write()?.signing_secrets.remove(handle).is_some())
    }

    async fn put_x25519_secret(&self, handle: &str, secret: &[u8]) -> Result<bool> {
        let mut inner = self.write()?;
        if inner.x25519_secrets.contains_key(handle) {
            return Ok(false);
        }
        inner
            .x25519_secrets
            .insert(handle.to_owned(), secret.to_vec());
        Ok(true)
    }

    async fn get_x25519_secret(&self, handle: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.read()?.x25519_secrets.get(handle).cloned())
    }

    async fn delete_x25519_secret(&self, handle: &str) -> Result<bool> {
        Ok(self.write()?.x25519_secrets.remove(handle).is_some())
    }

    async fn list_secret_handles(&self) -> Result<Vec<String>> {
        let inner = self.read()?;
        let mut handles: Vec<String> = inner
            .signing_secrets
            .keys()
            .chain(inner.x25519_secrets.keys())
            .cloned()
            .collect();
        handles.sort();
        handles.dedup();
        Ok(handles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trustgate_core::{AttributeMap, Keypair, UnsignedRotation};

    fn history(seed: u8) -> ChangeHistory {
        let keypair = Keypair::from_seed(&[seed; 32]);
        ChangeHistory::from_genesis(
            UnsignedRotation::genesis(keypair.public_key(), Timestamp(1))
                .sign(&keypair)
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_enroll_is_write_once() {
        let store = MemoryStore::new();
        let history = history(1);
        let id = history.identifier().unwrap();

        assert_eq!(
            store
                .enroll_identity(&id, &history, Timestamp(5))
                .await
                .unwrap(),
            EnrollResult::Inserted
        );
        assert!(matches!(
            store
                .enroll_identity(&id, &history, Timestamp(6))
                .await
                .unwrap(),
            EnrollResult::AlreadyExists(_)
        ));
        assert_eq!(store.get_enrollment(&id).await.unwrap(), Some(Timestamp(5)));
    }

    #[tokio::test]
    async fn test_cas_rejects_stale_length() {
        let store = MemoryStore::new();
        let history = history(1);
        let id = history.identifier().unwrap();
        store
            .enroll_identity(&id, &history, Timestamp(5))
            .await
            .unwrap();

        assert_eq!(
            store
                .compare_and_swap_history(&id, 3, &history)
                .await
                .unwrap(),
            CasResult::Conflict { actual_len: 1 }
        );
        assert_eq!(
            store
                .compare_and_swap_history(&id, 1, &history)
                .await
                .unwrap(),
            CasResult::Swapped
        );
    }

    #[tokio::test]
    async fn test_default_vault_is_exclusive() {
        let store = MemoryStore::new();
        store
            .put_vault(&NamedVault::new("a", "/a", false))
            .await
            .unwrap();
        store
            .put_vault(&NamedVault::new("b", "/b", false))
            .await
            .unwrap();

        assert!(store.get_default_vault().await.unwrap().is_none());
        assert!(store.set_default_vault("b").await.unwrap());
        assert!(store.set_default_vault("a").await.unwrap());

        let defaults: Vec<_> = store
            .list_vaults()
            .await
            .unwrap()
            .into_iter()
            .filter(|v| v.is_default)
            .collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].name, "a");
    }

    #[tokio::test]
    async fn test_secret_handles_listed_sorted() {
        let store = MemoryStore::new();
        store.put_x25519_secret("v:b", &[1]).await.unwrap();
        store
            .put_signing_secret(
                "v:a",
                &StoredSecret {
                    secret_type: "ed25519".into(),
                    secret: vec![2],
                },
            )
            .await
            .unwrap();
        assert_eq!(
            store.list_secret_handles().await.unwrap(),
            vec!["v:a".to_string(), "v:b".to_string()]
        );
    }

    #[tokio::test]
    async fn test_latest_attestation_by_added() {
        let store = MemoryStore::new();
        let id = Identifier::from_bytes([3; 20]);
        let entry = |role: &str, added: i64| {
            let mut attributes = AttributeMap::new();
            attributes.insert("role".into(), role.into());
            AttributesEntry::new(attributes, Timestamp(added), None, None)
        };

        for e in [entry("admin", 20), entry("member", 10), entry("ops", 20)] {
            store.insert_attestation(&id, &e).await.unwrap();
        }
        assert_eq!(
            store.get_latest_attestation(&id).await.unwrap(),
            Some(entry("ops", 20))
        );
        assert_eq!(store.list_attestations(&id).await.unwrap().len(), 3);
    }
}
