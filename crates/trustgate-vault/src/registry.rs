//! Registry of named vaults and the factories that open them.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use trustgate_store::{NamedVault, SecretStore, Store};

use crate::crypto::MasterKey;
use crate::error::{Result, VaultError};
use crate::handle::SecretHandle;
use crate::remote::{KmsClient, RemoteVault, RetryPolicy};
use crate::software::{SoftwareVault, SoftwareVaultConfig};
use crate::traits::{Vault, VaultKind};

/// Opens a vault backend from its persisted record.
#[async_trait]
pub trait VaultFactory: Send + Sync {
    async fn open(&self, record: &NamedVault) -> Result<Arc<dyn Vault>>;
}

/// Opens software vaults over a shared secret store.
pub struct SoftwareVaultFactory<S: SecretStore> {
    store: Arc<S>,
    master_key: MasterKey,
}

impl<S: SecretStore> SoftwareVaultFactory<S> {
    pub fn new(store: Arc<S>, master_key: MasterKey) -> Self {
        Self { store, master_key }
    }
}

#[async_trait]
impl<S: SecretStore + 'static> VaultFactory for SoftwareVaultFactory<S> {
    async fn open(&self, record: &NamedVault) -> Result<Arc<dyn Vault>> {
        let config = SoftwareVaultConfig {
            name: record.name.clone(),
            ..SoftwareVaultConfig::default()
        };
        let vault = SoftwareVault::new(config, self.master_key.clone(), self.store.clone())?;
        Ok(Arc::new(vault))
    }
}

/// Opens remote vaults through a shared key-service client.
pub struct RemoteVaultFactory<C: KmsClient> {
    client: Arc<C>,
    retry: RetryPolicy,
}

impl<C: KmsClient> RemoteVaultFactory<C> {
    pub fn new(client: Arc<C>, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }
}

#[async_trait]
impl<C: KmsClient + 'static> VaultFactory for RemoteVaultFactory<C> {
    async fn open(&self, record: &NamedVault) -> Result<Arc<dyn Vault>> {
        let vault = RemoteVault::new(record.name.clone(), self.client.clone(), self.retry.clone())?;
        Ok(Arc::new(vault))
    }
}

/// Named vaults, one of them the default.
///
/// Handles are resolved to the vault named in their prefix; a handle whose
/// vault is not registered is reported as not found.
#[derive(Default)]
pub struct VaultRegistry {
    factories: HashMap<VaultKind, Arc<dyn VaultFactory>>,
    vaults: RwLock<BTreeMap<String, Arc<dyn Vault>>>,
    default: RwLock<Option<String>>,
}

impl VaultRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the factory used to open vaults of `kind`.
    pub fn with_factory(mut self, kind: VaultKind, factory: Arc<dyn VaultFactory>) -> Self {
        self.factories.insert(kind, factory);
        self
    }

    /// Register an already-open vault. The first vault registered becomes
    /// the default if none is set.
    pub async fn insert(&self, vault: Arc<dyn Vault>) {
        let name = vault.name().to_owned();
        self.vaults.write().await.insert(name.clone(), vault);
        let mut default = self.default.write().await;
        if default.is_none() {
            *default = Some(name);
        }
    }

    /// Open a vault from its record through the matching factory, without
    /// registering it.
    pub async fn connect(&self, record: &NamedVault) -> Result<Arc<dyn Vault>> {
        let kind = VaultKind::from_aws_kms_flag(record.is_aws_kms);
        let factory = self
            .factories
            .get(&kind)
            .ok_or_else(|| VaultError::NoFactory(kind.to_string()))?;
        let vault = factory.open(record).await?;
        tracing::debug!(vault = %record.name, %kind, "opened vault");
        Ok(vault)
    }

    /// Register a vault opened from `record`, honouring its default flag.
    pub async fn register(&self, record: &NamedVault, vault: Arc<dyn Vault>) {
        self.insert(vault).await;
        if record.is_default {
            *self.default.write().await = Some(record.name.clone());
        }
    }

    /// Open a vault from its record and register it.
    pub async fn open(&self, record: &NamedVault) -> Result<Arc<dyn Vault>> {
        let vault = self.connect(record).await?;
        self.register(record, vault.clone()).await;
        Ok(vault)
    }

    /// Open every vault record in `store`.
    pub async fn load<S: Store + ?Sized>(&self, store: &S) -> Result<usize> {
        let records = store.list_vaults().await?;
        for record in &records {
            self.open(record).await?;
        }
        Ok(records.len())
    }

    /// Vault by name.
    pub async fn get(&self, name: &str) -> Result<Arc<dyn Vault>> {
        self.vaults
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| VaultError::UnknownVault(name.to_owned()))
    }

    /// The default vault.
    pub async fn default_vault(&self) -> Result<Arc<dyn Vault>> {
        let name = self
            .default
            .read()
            .await
            .clone()
            .ok_or_else(|| VaultError::UnknownVault("<default>".to_owned()))?;
        self.get(&name).await
    }

    /// Make a registered vault the default.
    pub async fn set_default(&self, name: &str) -> Result<()> {
        if !self.vaults.read().await.contains_key(name) {
            return Err(VaultError::UnknownVault(name.to_owned()));
        }
        *self.default.write().await = Some(name.to_owned());
        Ok(())
    }

    /// The vault that owns `handle`.
    pub async fn resolve(&self, handle: &SecretHandle) -> Result<Arc<dyn Vault>> {
        self.vaults
            .read()
            .await
            .get(handle.vault_name())
            .cloned()
            .ok_or_else(|| VaultError::HandleNotFound(handle.to_string()))
    }

    /// Names of all registered vaults, sorted.
    pub async fn names(&self) -> Vec<String> {
        self.vaults.read().await.keys().cloned().collect()
    }
}
