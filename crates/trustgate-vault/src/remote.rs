//! Remote-custody vault backed by a key-management service.
//!
//! Every call to the service is bounded by a timeout and retried with bounded
//! exponential backoff while it fails with [`VaultError::VaultUnavailable`].
//! Generation passes the caller's [`RequestToken`] through, so a retried
//! request whose first response was lost returns the key created by the first
//! attempt instead of minting a second one.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use trustgate_core::{Ed25519PublicKey, Ed25519Signature, Keypair};

use crate::error::{Result, VaultError};
use crate::handle::{validate_vault_name, RequestToken, SecretHandle, SecretType};
use crate::traits::{Vault, VaultKind, VaultPublicKey};

/// Timeout and backoff for remote calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound on the delay between retries.
    pub max_backoff: Duration,
    /// Deadline for a single attempt.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
            call_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempt`-th failure (1-based), doubling up to `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Run `call` under this policy.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.call_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(VaultError::VaultUnavailable(format!(
                    "{} timed out after {:?}",
                    operation, self.call_timeout
                ))),
            };

            match result {
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(operation, attempt, ?delay, error = %e, "remote vault call failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

/// Client of a remote key-management service.
///
/// Only Ed25519 signing keys are supported remotely. Implementations report
/// transient failures as [`VaultError::VaultUnavailable`].
#[async_trait]
pub trait KmsClient: Send + Sync {
    /// Create a key, or return the one already created for `token`.
    async fn create_key(&self, token: &RequestToken) -> Result<String>;

    async fn sign(&self, key_id: &str, message: &[u8]) -> Result<Ed25519Signature>;

    async fn public_key(&self, key_id: &str) -> Result<Ed25519PublicKey>;

    /// Schedule a key for deletion. Returns whether it existed.
    async fn delete_key(&self, key_id: &str) -> Result<bool>;

    async fn list_keys(&self) -> Result<Vec<String>>;
}

/// A vault whose keys never leave a remote service.
pub struct RemoteVault<C: KmsClient> {
    name: String,
    client: Arc<C>,
    retry: RetryPolicy,
}

impl<C: KmsClient> RemoteVault<C> {
    pub fn new(name: impl Into<String>, client: Arc<C>, retry: RetryPolicy) -> Result<Self> {
        let name = name.into();
        validate_vault_name(&name)?;
        Ok(Self {
            name,
            client,
            retry,
        })
    }

    fn owned_key_id<'a>(&self, handle: &'a SecretHandle) -> Result<&'a str> {
        if handle.is_owned_by(&self.name) {
            Ok(handle.key_id())
        } else {
            Err(VaultError::HandleNotFound(handle.to_string()))
        }
    }
}

#[async_trait]
impl<C: KmsClient + 'static> Vault for RemoteVault<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> VaultKind {
        VaultKind::AwsKms
    }

    async fn generate_key(
        &self,
        secret_type: SecretType,
        token: &RequestToken,
    ) -> Result<SecretHandle> {
        if secret_type != SecretType::Ed25519 {
            return Err(self.unsupported("generate_key(x25519)"));
        }
        let key_id = self
            .retry
            .run("create_key", || self.client.create_key(token))
            .await?;
        SecretHandle::new(&self.name, &key_id)
    }

    async fn sign(&self, handle: &SecretHandle, message: &[u8]) -> Result<Ed25519Signature> {
        let key_id = self.owned_key_id(handle)?;
        self.retry
            .run("sign", || self.client.sign(key_id, message))
            .await
    }

    async fn public_key(&self, handle: &SecretHandle) -> Result<VaultPublicKey> {
        let key_id = self.owned_key_id(handle)?;
        let key = self
            .retry
            .run("public_key", || self.client.public_key(key_id))
            .await?;
        Ok(VaultPublicKey::Ed25519(key))
    }

    async fn delete_key(&self, handle: &SecretHandle) -> Result<bool> {
        let key_id = self.owned_key_id(handle)?;
        self.retry
            .run("delete_key", || self.client.delete_key(key_id))
            .await
    }

    async fn list_handles(&self) -> Result<Vec<SecretHandle>> {
        let keys = self
            .retry
            .run("list_keys", || self.client.list_keys())
            .await?;
        keys.iter()
            .map(|key_id| SecretHandle::new(&self.name, key_id))
            .collect()
    }
}

/// In-process key service with failure injection, for tests and local runs.
#[derive(Default)]
pub struct MemoryKms {
    state: Mutex<MemoryKmsState>,
    fail_next: AtomicU32,
    delay: Mutex<Option<Duration>>,
    calls: AtomicU32,
}

#[derive(Default)]
struct MemoryKmsState {
    keys: BTreeMap<String, Keypair>,
    tokens: BTreeMap<RequestToken, String>,
    next_id: u64,
}

impl MemoryKms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls fail with `VaultUnavailable`.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Delay every call by `delay`.
    pub fn set_delay(&self, delay: Option<Duration>) {
        if let Ok(mut d) = self.delay.lock() {
            *d = delay;
        }
    }

    /// Number of calls received, failed ones included.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay.lock().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(VaultError::VaultUnavailable("injected failure".to_owned()));
        }
        Ok(())
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, MemoryKmsState>> {
        self.state
            .lock()
            .map_err(|e| VaultError::VaultUnavailable(format!("kms state poisoned: {}", e)))
    }

    fn key(&self, key_id: &str) -> Result<Keypair> {
        self.state()?
            .keys
            .get(key_id)
            .cloned()
            .ok_or_else(|| VaultError::HandleNotFound(key_id.to_owned()))
    }
}

#[async_trait]
impl KmsClient for MemoryKms {
    async fn create_key(&self, token: &RequestToken) -> Result<String> {
        self.enter().await?;
        let mut state = self.state()?;
        if let Some(existing) = state.tokens.get(token) {
            return Ok(existing.clone());
        }
        state.next_id += 1;
        let key_id = format!("arn:kms:local:key/{}", state.next_id);
        state.keys.insert(key_id.clone(), Keypair::generate());
        state.tokens.insert(*token, key_id.clone());
        Ok(key_id)
    }

    async fn sign(&self, key_id: &str, message: &[u8]) -> Result<Ed25519Signature> {
        self.enter().await?;
        Ok(self.key(key_id)?.sign(message))
    }

    async fn public_key(&self, key_id: &str) -> Result<Ed25519PublicKey> {
        self.enter().await?;
        Ok(self.key(key_id)?.public_key())
    }

    async fn delete_key(&self, key_id: &str) -> Result<bool> {
        self.enter().await?;
        Ok(self.state()?.keys.remove(key_id).is_some())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        self.enter().await?;
        Ok(self.state()?.keys.keys().cloned().collect())
    }
}
