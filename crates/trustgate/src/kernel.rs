//! The kernel: ledger, attestations, policies and vaults behind one API.
//!
//! Operations that create vault secrets and then record something about them
//! are two-phase. The secret is generated first; if the ledger or attestation
//! write does not commit, the fresh handle is deleted again.

use std::sync::Arc;

use trustgate_core::{
    AttributeCredential, CredentialBody, Identifier, Purpose, PurposeKeyAttestation,
    PurposePublicKey, Timestamp, UnsignedRotation,
};
use trustgate_policy::PolicyEngine;
use trustgate_store::{NamedVault, Store};
use trustgate_vault::{RequestToken, SecretHandle, SecretType, Vault, VaultError, VaultRegistry};

use crate::attestation::AttestationStore;
use crate::authorize::{AuditSink, Authorizer, Decision, TracingAuditSink};
use crate::config::KernelConfig;
use crate::error::Result;
use crate::ledger::IdentityLedger;

/// An identity whose key is held by a vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultIdentity {
    pub identifier: Identifier,
    /// Handle of the identity's current key.
    pub handle: SecretHandle,
}

/// The main kernel struct.
pub struct TrustKernel<S: Store> {
    store: Arc<S>,
    config: KernelConfig,
    ledger: IdentityLedger<S>,
    attestations: AttestationStore<S>,
    policies: Arc<PolicyEngine<S>>,
    vaults: Arc<VaultRegistry>,
    authorizer: Authorizer<S>,
}

impl<S: Store> TrustKernel<S> {
    /// Open a kernel over `store`, loading persisted policies.
    ///
    /// `vaults` should already hold (or be able to open) every vault the
    /// store's handles refer to.
    pub async fn open(store: Arc<S>, vaults: VaultRegistry, config: KernelConfig) -> Result<Self> {
        let policies = Arc::new(PolicyEngine::open(store.clone()).await?);
        if let Some(name) = &config.default_vault {
            vaults.set_default(name).await?;
        }

        let ledger = IdentityLedger::new(store.clone());
        let attestations = AttestationStore::new(store.clone(), ledger.clone());
        let authorizer = Authorizer::new(
            ledger.clone(),
            attestations.clone(),
            policies.clone(),
            Arc::new(TracingAuditSink),
            config.verify_chain_on_authorize,
        );

        Ok(Self {
            store,
            config,
            ledger,
            attestations,
            policies,
            vaults: Arc::new(vaults),
            authorizer,
        })
    }

    /// Send decisions to `sink` instead of the tracing audit target.
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.authorizer = Authorizer::new(
            self.ledger.clone(),
            self.attestations.clone(),
            self.policies.clone(),
            sink,
            self.config.verify_chain_on_authorize,
        );
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn ledger(&self) -> &IdentityLedger<S> {
        &self.ledger
    }

    pub fn attestations(&self) -> &AttestationStore<S> {
        &self.attestations
    }

    pub fn policies(&self) -> &PolicyEngine<S> {
        &self.policies
    }

    pub fn vaults(&self) -> &VaultRegistry {
        &self.vaults
    }

    /// The identity this process acts as by default.
    pub fn default_identity(&self) -> Option<Identifier> {
        self.config.default_identity
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Vaults
    // ─────────────────────────────────────────────────────────────────────────

    /// Open a vault from its record, persist the record, then register it.
    pub async fn add_vault(&self, record: NamedVault) -> Result<Arc<dyn Vault>> {
        let vault = self.vaults.connect(&record).await?;
        self.store.put_vault(&record).await?;
        self.vaults.register(&record, vault.clone()).await;
        Ok(vault)
    }

    /// Make a recorded vault the default, in the store and then the registry.
    pub async fn set_default_vault(&self, name: &str) -> Result<()> {
        self.vaults.get(name).await?;
        if !self.store.set_default_vault(name).await? {
            return Err(VaultError::UnknownVault(name.to_owned()).into());
        }
        self.vaults.set_default(name).await?;
        Ok(())
    }

    /// The named vault, or the registry's default.
    ///
    /// `KernelConfig::default_vault` only seeds the registry's default when
    /// the kernel is opened; [`set_default_vault`](Self::set_default_vault)
    /// replaces it.
    pub async fn vault(&self, name: Option<&str>) -> Result<Arc<dyn Vault>> {
        let vault = match name {
            Some(name) => self.vaults.get(name).await?,
            None => self.vaults.default_vault().await?,
        };
        Ok(vault)
    }

    async fn discard(&self, vault: &dyn Vault, handle: &SecretHandle) {
        match vault.delete_key(handle).await {
            Ok(_) => tracing::debug!(%handle, "discarded orphaned secret"),
            Err(e) => tracing::warn!(%handle, error = %e, "failed to discard orphaned secret"),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Identity Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Generate a key in a vault and enroll the identity it defines.
    pub async fn create_identity(&self, vault: Option<&str>, at: Timestamp) -> Result<VaultIdentity> {
        let vault = self.vault(vault).await?;
        let handle = vault
            .generate_key(SecretType::Ed25519, &RequestToken::generate())
            .await?;

        match self.enroll_handle(vault.as_ref(), &handle, at).await {
            Ok(identifier) => Ok(VaultIdentity { identifier, handle }),
            Err(e) => {
                self.discard(vault.as_ref(), &handle).await;
                Err(e)
            }
        }
    }

    async fn enroll_handle(&self, vault: &dyn Vault, handle: &SecretHandle, at: Timestamp) -> Result<Identifier> {
        let public_key = vault.public_key(handle).await?.ed25519(handle)?;
        let unsigned = UnsignedRotation::genesis(public_key, at);
        let signature = vault.sign(handle, &unsigned.signing_message()?).await?;
        self.ledger.enroll(unsigned.with_signature(signature), at).await
    }

    /// Rotate `identity` to a fresh key in the same vault.
    ///
    /// Lost compare-and-swap races are retried against the refreshed chain up
    /// to `rotation_retries` times. On success the returned identity holds the
    /// new handle; the old one is left in the vault.
    pub async fn rotate_key(&self, identity: &VaultIdentity, at: Timestamp) -> Result<VaultIdentity> {
        let vault = self.vaults.resolve(&identity.handle).await?;
        let handle = vault
            .generate_key(SecretType::Ed25519, &RequestToken::generate())
            .await?;

        match self.append_handle(vault.as_ref(), identity, &handle, at).await {
            Ok(()) => Ok(VaultIdentity {
                identifier: identity.identifier,
                handle,
            }),
            Err(e) => {
                self.discard(vault.as_ref(), &handle).await;
                Err(e)
            }
        }
    }

    async fn append_handle(
        &self,
        vault: &dyn Vault,
        identity: &VaultIdentity,
        next: &SecretHandle,
        at: Timestamp,
    ) -> Result<()> {
        let next_key = vault.public_key(next).await?.ed25519(next)?;
        let mut retries = 0;
        loop {
            let history = self.ledger.change_history(&identity.identifier).await?;
            let unsigned = history.next_rotation(next_key, at)?;
            let signature = vault
                .sign(&identity.handle, &unsigned.signing_message()?)
                .await?;
            let result = self
                .ledger
                .append_rotation(
                    &identity.identifier,
                    unsigned.with_signature(signature),
                    history.len(),
                )
                .await;
            match result {
                Ok(_) => return Ok(()),
                Err(e) if e.is_retryable() && retries < self.config.rotation_retries => {
                    retries += 1;
                    tracing::debug!(identifier = %identity.identifier, retries, "retrying rotation");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Generate a purpose key in the identity's vault and attest it with the
    /// identity's current key.
    pub async fn issue_purpose_key(
        &self,
        identity: &VaultIdentity,
        purpose: Purpose,
        created: Timestamp,
        expires: Option<Timestamp>,
    ) -> Result<(SecretHandle, PurposeKeyAttestation)> {
        let vault = self.vaults.resolve(&identity.handle).await?;
        let secret_type = match purpose {
            Purpose::Signing => SecretType::Ed25519,
            Purpose::KeyExchange => SecretType::X25519,
        };
        let handle = vault
            .generate_key(secret_type, &RequestToken::generate())
            .await?;

        match self
            .attest_purpose_handle(vault.as_ref(), identity, &handle, purpose, created, expires)
            .await
        {
            Ok(attestation) => Ok((handle, attestation)),
            Err(e) => {
                self.discard(vault.as_ref(), &handle).await;
                Err(e)
            }
        }
    }

    async fn attest_purpose_handle(
        &self,
        vault: &dyn Vault,
        identity: &VaultIdentity,
        handle: &SecretHandle,
        purpose: Purpose,
        created: Timestamp,
        expires: Option<Timestamp>,
    ) -> Result<PurposeKeyAttestation> {
        let public = vault.public_key(handle).await?;
        let purpose_key = match purpose {
            Purpose::Signing => PurposePublicKey::Signing(public.ed25519(handle)?),
            Purpose::KeyExchange => PurposePublicKey::KeyExchange(public.x25519(handle)?),
        };

        let mut builder = PurposeKeyAttestation::builder(identity.identifier, purpose_key, created);
        if let Some(expires) = expires {
            builder = builder.expires(expires);
        }
        let signature = vault
            .sign(&identity.handle, &builder.signing_message()?)
            .await?;
        let attestation = builder.with_signature(signature);
        self.attestations.issue_purpose_key(&attestation).await?;
        Ok(attestation)
    }

    /// Sign a credential as `authority`, whose key is held by a vault.
    ///
    /// The credential is not recorded; holders present it elsewhere through
    /// [`AttestationStore::import_credential`].
    pub async fn issue_credential(
        &self,
        authority: &VaultIdentity,
        body: CredentialBody,
    ) -> Result<AttributeCredential> {
        let vault = self.vaults.resolve(&authority.handle).await?;
        let signature = vault
            .sign(&authority.handle, &body.signing_message()?)
            .await?;
        Ok(body.with_signature(signature))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Authorization
    // ─────────────────────────────────────────────────────────────────────────

    /// Decide whether `subject` may perform `action` on `resource` at `at`.
    pub async fn authorize(
        &self,
        subject: &Identifier,
        resource: &str,
        action: &str,
        at: Timestamp,
    ) -> Result<Decision> {
        self.authorizer.authorize(subject, resource, action, at).await
    }
}
