//! Software vault: secrets sealed under a master key in a [`SecretStore`].

use std::sync::Arc;

use async_trait::async_trait;
use trustgate_core::{Ed25519Signature, Keypair, X25519PublicKey};
use trustgate_store::{SecretStore, StoredSecret};

use crate::crypto::{
    random_secret, secret_array, MasterKey, SealedSecret, SharedKey, X25519StaticSecret,
};
use crate::error::{Result, VaultError};
use crate::handle::{validate_vault_name, RequestToken, SecretHandle, SecretType};
use crate::traits::{Vault, VaultKind, VaultPublicKey};

/// Configuration of a software vault.
#[derive(Debug, Clone)]
pub struct SoftwareVaultConfig {
    /// Vault name; prefixes every handle.
    pub name: String,
    /// Whether externally generated secrets may be imported.
    pub allow_import: bool,
}

impl Default for SoftwareVaultConfig {
    fn default() -> Self {
        Self {
            name: "default".to_owned(),
            allow_import: true,
        }
    }
}

/// A vault keeping secrets encrypted at rest.
///
/// Ed25519 secrets live in `signing_secret`, X25519 secrets in
/// `x25519_secret`. Each sealed blob is bound to its handle, so rows cannot be
/// swapped between handles.
pub struct SoftwareVault<S: SecretStore> {
    config: SoftwareVaultConfig,
    master_key: MasterKey,
    store: Arc<S>,
}

impl<S: SecretStore + 'static> SoftwareVault<S> {
    /// Create a vault over `store`.
    pub fn new(config: SoftwareVaultConfig, master_key: MasterKey, store: Arc<S>) -> Result<Self> {
        validate_vault_name(&config.name)?;
        Ok(Self {
            config,
            master_key,
            store,
        })
    }

    /// Deterministic key id for a generation request.
    fn key_id(&self, secret_type: SecretType, material: &[u8]) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.config.name.as_bytes());
        hasher.update(&[0]);
        hasher.update(secret_type.as_str().as_bytes());
        hasher.update(&[0]);
        hasher.update(material);
        hex::encode(&hasher.finalize().as_bytes()[..16])
    }

    /// Which table holds `handle`, if any.
    async fn stored_type(&self, handle: &SecretHandle) -> Result<Option<SecretType>> {
        if self
            .store
            .get_signing_secret(handle.as_str())
            .await?
            .is_some()
        {
            return Ok(Some(SecretType::Ed25519));
        }
        if self
            .store
            .get_x25519_secret(handle.as_str())
            .await?
            .is_some()
        {
            return Ok(Some(SecretType::X25519));
        }
        Ok(None)
    }

    async fn store_secret(
        &self,
        handle: &SecretHandle,
        secret_type: SecretType,
        secret: &[u8; 32],
    ) -> Result<()> {
        let sealed = self
            .master_key
            .seal(secret, handle.as_str().as_bytes())?
            .to_bytes()?;
        let inserted = match secret_type {
            SecretType::Ed25519 => {
                self.store
                    .put_signing_secret(
                        handle.as_str(),
                        &StoredSecret {
                            secret_type: secret_type.as_str().to_owned(),
                            secret: sealed,
                        },
                    )
                    .await?
            }
            SecretType::X25519 => {
                self.store
                    .put_x25519_secret(handle.as_str(), &sealed)
                    .await?
            }
        };
        if !inserted {
            tracing::debug!(%handle, "secret already stored, keeping existing");
        }
        Ok(())
    }

    async fn load_signing(&self, handle: &SecretHandle) -> Result<Keypair> {
        self.check_owner(handle)?;
        let Some(row) = self.store.get_signing_secret(handle.as_str()).await? else {
            return Err(self.missing_or_wrong_type(handle, SecretType::Ed25519).await);
        };
        let sealed = SealedSecret::from_bytes(&row.secret)?;
        let seed = secret_array(&self.master_key.open(&sealed, handle.as_str().as_bytes())?)?;
        Ok(Keypair::from_seed(&seed))
    }

    async fn load_x25519(&self, handle: &SecretHandle) -> Result<X25519StaticSecret> {
        self.check_owner(handle)?;
        let Some(blob) = self.store.get_x25519_secret(handle.as_str()).await? else {
            return Err(self.missing_or_wrong_type(handle, SecretType::X25519).await);
        };
        let sealed = SealedSecret::from_bytes(&blob)?;
        let secret = secret_array(&self.master_key.open(&sealed, handle.as_str().as_bytes())?)?;
        Ok(X25519StaticSecret::from_bytes(secret))
    }

    async fn missing_or_wrong_type(&self, handle: &SecretHandle, expected: SecretType) -> VaultError {
        match self.stored_type(handle).await {
            Ok(Some(_)) => VaultError::WrongSecretType {
                handle: handle.to_string(),
                expected: expected.to_string(),
            },
            Ok(None) => VaultError::HandleNotFound(handle.to_string()),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl<S: SecretStore + 'static> Vault for SoftwareVault<S> {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> VaultKind {
        VaultKind::Software
    }

    async fn generate_key(
        &self,
        secret_type: SecretType,
        token: &RequestToken,
    ) -> Result<SecretHandle> {
        let handle = SecretHandle::new(&self.config.name, &self.key_id(secret_type, &token.0))?;

        // Retried request: the secret was stored on an earlier attempt.
        if self.stored_type(&handle).await?.is_some() {
            return Ok(handle);
        }

        self.store_secret(&handle, secret_type, &random_secret())
            .await?;
        tracing::debug!(vault = %self.config.name, %handle, %secret_type, "generated secret");
        Ok(handle)
    }

    async fn sign(&self, handle: &SecretHandle, message: &[u8]) -> Result<Ed25519Signature> {
        Ok(self.load_signing(handle).await?.sign(message))
    }

    async fn public_key(&self, handle: &SecretHandle) -> Result<VaultPublicKey> {
        self.check_owner(handle)?;
        match self.stored_type(handle).await? {
            Some(SecretType::Ed25519) => Ok(VaultPublicKey::Ed25519(
                self.load_signing(handle).await?.public_key(),
            )),
            Some(SecretType::X25519) => Ok(VaultPublicKey::X25519(
                self.load_x25519(handle).await?.public_key(),
            )),
            None => Err(VaultError::HandleNotFound(handle.to_string())),
        }
    }

    async fn delete_key(&self, handle: &SecretHandle) -> Result<bool> {
        self.check_owner(handle)?;
        let signing = self.store.delete_signing_secret(handle.as_str()).await?;
        let x25519 = self.store.delete_x25519_secret(handle.as_str()).await?;
        Ok(signing || x25519)
    }

    async fn list_handles(&self) -> Result<Vec<SecretHandle>> {
        let handles = self.store.list_secret_handles().await?;
        Ok(handles
            .iter()
            .filter_map(|h| h.parse::<SecretHandle>().ok())
            .filter(|h| h.is_owned_by(&self.config.name))
            .collect())
    }

    async fn import_key(&self, secret_type: SecretType, secret: &[u8; 32]) -> Result<SecretHandle> {
        if !self.config.allow_import {
            return Err(self.unsupported("import_key"));
        }
        let public = match secret_type {
            SecretType::Ed25519 => *Keypair::from_seed(secret).public_key().as_bytes(),
            SecretType::X25519 => *X25519StaticSecret::from_bytes(*secret)
                .public_key()
                .as_bytes(),
        };
        let handle = SecretHandle::new(&self.config.name, &self.key_id(secret_type, &public))?;
        self.store_secret(&handle, secret_type, secret).await?;
        Ok(handle)
    }

    async fn key_agreement(
        &self,
        handle: &SecretHandle,
        peer: &X25519PublicKey,
    ) -> Result<SharedKey> {
        Ok(self.load_x25519(handle).await?.diffie_hellman(peer))
    }
}
