//! Identities whose keys live in vaults.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use trustgate::core::{
    CredentialBody, Ed25519Signature, PurposePublicKey, X25519PublicKey,
};
use trustgate::store::{MemoryStore, NamedVault, SecretStore, Store};
use trustgate::vault::{
    MemoryKms, RemoteVault, RequestToken, RetryPolicy, SecretHandle, SecretType, SharedKey, Vault,
    VaultError, VaultKind, VaultPublicKey, VaultRegistry,
};
use trustgate::{
    KernelConfig, KernelError, Purpose, Timestamp, TrustKernel, VaultIdentity,
};
use trustgate_testkit::{text_attributes, vault_registry};

const T0: Timestamp = Timestamp(1_000);
const T1: Timestamp = Timestamp(2_000);

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
        call_timeout: Duration::from_millis(500),
    }
}

struct Setup {
    kernel: TrustKernel<MemoryStore>,
    store: Arc<MemoryStore>,
    kms: Arc<MemoryKms>,
}

async fn setup(config: KernelConfig) -> anyhow::Result<Setup> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let store = Arc::new(MemoryStore::new());
    let kms = Arc::new(MemoryKms::new());
    let registry = vault_registry(store.clone(), kms.clone(), fast_retry());

    let kernel = TrustKernel::open(store.clone(), registry, KernelConfig::default()).await?;
    kernel
        .add_vault(NamedVault::new("local", "memory", false))
        .await?;
    kernel.add_vault(NamedVault::new("kms", "arn:kms:local", true)).await?;

    // Reopen with the requested config now that both vaults are recorded.
    let registry = vault_registry(store.clone(), kms.clone(), fast_retry());
    registry.load(store.as_ref()).await?;
    let kernel = TrustKernel::open(store.clone(), registry, config).await?;
    Ok(Setup { kernel, store, kms })
}

#[tokio::test]
async fn test_create_rotate_and_sign_credentials() -> anyhow::Result<()> {
    let Setup { kernel, .. } = setup(KernelConfig::default()).await?;

    let alice = kernel.create_identity(Some("local"), T0).await?;
    assert_eq!(alice.handle.vault_name(), "local");
    let genesis_key = kernel.ledger().current_key(&alice.identifier).await?;

    let rotated = kernel.rotate_key(&alice, T1).await?;
    assert_eq!(rotated.identifier, alice.identifier);
    assert_ne!(rotated.handle, alice.handle);
    assert_ne!(kernel.ledger().current_key(&alice.identifier).await?, genesis_key);
    kernel.ledger().verify_chain(&alice.identifier).await?;

    // An authority whose key sits in the remote vault signs a credential.
    let authority = kernel.create_identity(Some("kms"), T0).await?;
    let history = kernel.ledger().change_history(&authority.identifier).await?;
    kernel
        .attestations()
        .add_authority(history, "kms-authority:4000")
        .await?;
    let credential = kernel
        .issue_credential(
            &authority,
            CredentialBody {
                subject: alice.identifier,
                attributes: text_attributes(&[("role", "ops")]),
                added: T1,
                expires: None,
                issuer: authority.identifier,
            },
        )
        .await?;
    kernel.attestations().import_credential(&credential).await?;
    let attributes = kernel
        .attestations()
        .attributes_of(&alice.identifier, T1)
        .await?;
    assert_eq!(attributes, text_attributes(&[("role", "ops")]));
    Ok(())
}

#[tokio::test]
async fn test_default_vault_comes_from_config() -> anyhow::Result<()> {
    let config = KernelConfig {
        default_vault: Some("kms".to_owned()),
        ..KernelConfig::default()
    };
    let Setup { kernel, store, .. } = setup(config).await?;

    let identity = kernel.create_identity(None, T0).await?;
    assert_eq!(identity.handle.vault_name(), "kms");
    assert_eq!(kernel.vault(None).await?.kind(), VaultKind::AwsKms);

    kernel.set_default_vault("local").await?;
    let record = store.get_default_vault().await?;
    assert_eq!(record.map(|v| v.name), Some("local".to_owned()));

    // The configured default was only the starting point.
    let identity = kernel.create_identity(None, T1).await?;
    assert_eq!(identity.handle.vault_name(), "local");
    assert_eq!(kernel.vault(None).await?.kind(), VaultKind::Software);
    Ok(())
}

#[tokio::test]
async fn test_vault_records_are_persisted_before_use() -> anyhow::Result<()> {
    let Setup { kernel, store, kms } = setup(KernelConfig::default()).await?;
    kernel.set_default_vault("kms").await?;

    // Registered in memory but never recorded.
    let scratch = RemoteVault::new("scratch", kms, fast_retry())?;
    kernel.vaults().insert(Arc::new(scratch)).await;
    let err = kernel
        .set_default_vault("scratch")
        .await
        .err()
        .expect("unrecorded vault");
    assert!(matches!(err, KernelError::Vault(VaultError::UnknownVault(_))));
    assert_eq!(kernel.vault(None).await?.name(), "kms");
    let record = store.get_default_vault().await?;
    assert_eq!(record.map(|v| v.name), Some("kms".to_owned()));

    // A record no factory can open is not persisted.
    let bare = TrustKernel::open(store.clone(), VaultRegistry::new(), KernelConfig::default()).await?;
    assert!(bare
        .add_vault(NamedVault::new("hsm", "arn:kms:other", true))
        .await
        .is_err());
    assert!(store.get_vault("hsm").await?.is_none());
    assert!(bare.vaults().names().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_purpose_keys_follow_the_current_identity_key() -> anyhow::Result<()> {
    let Setup { kernel, store, .. } = setup(KernelConfig::default()).await?;
    let alice = kernel.create_identity(Some("local"), T0).await?;

    let (signing_handle, signing) = kernel
        .issue_purpose_key(&alice, Purpose::Signing, T0, None)
        .await?;
    assert!(matches!(signing.purpose_key, PurposePublicKey::Signing(_)));
    let (_, exchange) = kernel
        .issue_purpose_key(&alice, Purpose::KeyExchange, T0, Some(T1))
        .await?;
    assert!(matches!(exchange.purpose_key, PurposePublicKey::KeyExchange(_)));

    let found = kernel
        .attestations()
        .purpose_key_of(&alice.identifier, Purpose::KeyExchange, Timestamp(1_500))
        .await?;
    assert_eq!(found, exchange);
    assert!(matches!(
        kernel
            .attestations()
            .purpose_key_of(&alice.identifier, Purpose::KeyExchange, T1)
            .await,
        Err(KernelError::NoPurposeKey { .. })
    ));

    // After rotation the old handle can no longer vouch for purpose keys, and
    // the key generated for the failed attempt is discarded.
    let rotated = kernel.rotate_key(&alice, T1).await?;
    let handles_before = store.list_secret_handles().await?;
    let err = kernel
        .issue_purpose_key(&alice, Purpose::Signing, T1, None)
        .await
        .err()
        .expect("stale identity key must be rejected");
    assert!(matches!(err, KernelError::InvalidAttestation(_)));
    assert_eq!(store.list_secret_handles().await?, handles_before);

    kernel
        .issue_purpose_key(&rotated, Purpose::Signing, T1, None)
        .await?;
    let vault = kernel.vaults().resolve(&signing_handle).await?;
    assert!(vault.public_key(&signing_handle).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn test_remote_vault_rejects_key_exchange_keys() -> anyhow::Result<()> {
    let Setup { kernel, .. } = setup(KernelConfig::default()).await?;
    let authority = kernel.create_identity(Some("kms"), T0).await?;
    let err = kernel
        .issue_purpose_key(&authority, Purpose::KeyExchange, T0, None)
        .await
        .err()
        .expect("remote vaults hold no x25519 keys");
    assert!(matches!(err, KernelError::Vault(VaultError::Unsupported { .. })));
    Ok(())
}

#[tokio::test]
async fn test_transient_kms_failures_are_retried() -> anyhow::Result<()> {
    let Setup { kernel, kms, .. } = setup(KernelConfig::default()).await?;

    kms.fail_next(2);
    let identity = kernel.create_identity(Some("kms"), T0).await?;
    kernel.ledger().verify_chain(&identity.identifier).await?;

    kms.fail_next(10);
    let err = kernel
        .create_identity(Some("kms"), T1)
        .await
        .err()
        .expect("retries are bounded");
    assert!(matches!(err, KernelError::VaultUnavailable(_)));
    assert!(err.is_retryable());
    Ok(())
}

#[tokio::test]
async fn test_foreign_handle_is_not_found() -> anyhow::Result<()> {
    let Setup { kernel, .. } = setup(KernelConfig::default()).await?;
    let alice = kernel.create_identity(Some("local"), T0).await?;

    let kms = kernel.vaults().get("kms").await?;
    let err = kms.sign(&alice.handle, b"message").await.err().expect("foreign handle");
    assert!(matches!(err, VaultError::HandleNotFound(_)));

    let ghost = VaultIdentity {
        identifier: alice.identifier,
        handle: SecretHandle::new("retired", "1")?,
    };
    assert!(matches!(
        kernel.rotate_key(&ghost, T1).await,
        Err(KernelError::VaultHandleNotFound(_))
    ));
    Ok(())
}

/// Delegates to another vault but cannot sign.
struct UnsignableVault(Arc<dyn Vault>);

#[async_trait]
impl Vault for UnsignableVault {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn kind(&self) -> VaultKind {
        self.0.kind()
    }

    async fn generate_key(
        &self,
        secret_type: SecretType,
        token: &RequestToken,
    ) -> trustgate::vault::Result<SecretHandle> {
        self.0.generate_key(secret_type, token).await
    }

    async fn sign(&self, _: &SecretHandle, _: &[u8]) -> trustgate::vault::Result<Ed25519Signature> {
        Err(VaultError::VaultUnavailable("signer offline".to_owned()))
    }

    async fn public_key(&self, handle: &SecretHandle) -> trustgate::vault::Result<VaultPublicKey> {
        self.0.public_key(handle).await
    }

    async fn delete_key(&self, handle: &SecretHandle) -> trustgate::vault::Result<bool> {
        self.0.delete_key(handle).await
    }

    async fn list_handles(&self) -> trustgate::vault::Result<Vec<SecretHandle>> {
        self.0.list_handles().await
    }

    async fn key_agreement(
        &self,
        handle: &SecretHandle,
        peer: &X25519PublicKey,
    ) -> trustgate::vault::Result<SharedKey> {
        self.0.key_agreement(handle, peer).await
    }
}

#[tokio::test]
async fn test_failed_enrollment_discards_generated_key() -> anyhow::Result<()> {
    let Setup { kernel, .. } = setup(KernelConfig::default()).await?;
    let local = kernel.vaults().get("local").await?;
    kernel
        .vaults()
        .insert(Arc::new(UnsignableVault(local.clone())))
        .await;

    let before = local.list_handles().await?;
    let err = kernel
        .create_identity(Some("local"), T0)
        .await
        .err()
        .expect("signing fails");
    assert!(matches!(err, KernelError::VaultUnavailable(_)));
    assert_eq!(local.list_handles().await?, before);
    assert!(kernel.ledger().identifiers().await?.is_empty());
    Ok(())
}
