//! Concurrent rotations of one identity: exactly one winner per chain length.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use trustgate::core::{Ed25519PublicKey, Keypair};
use trustgate::store::{MemoryStore, SqliteStore, Store};
use trustgate::vault::VaultRegistry;
use trustgate::{
    ConflictReason, IdentityLedger, KernelConfig, KernelError, Timestamp, TrustKernel,
};
use trustgate_testkit::{vault_registry, TestIdentity};

const CONTENDERS: usize = 8;

async fn one_winner_per_length<S: Store + 'static>(store: Arc<S>) -> anyhow::Result<()> {
    let ledger = IdentityLedger::new(store);
    let alice = TestIdentity::new(Timestamp(100));
    let id = ledger.enroll(alice.genesis(), Timestamp(100)).await?;

    let mut tasks = Vec::new();
    for i in 0..CONTENDERS {
        let ledger = ledger.clone();
        let event = alice.rotation_signed_by(alice.current(), Timestamp(200 + i as i64));
        tasks.push(tokio::spawn(async move {
            ledger.append_rotation(&id, event, 1).await
        }));
    }

    let mut winners = 0;
    for task in tasks {
        match task.await? {
            Ok(history) => {
                winners += 1;
                assert_eq!(history.len(), 2);
            }
            Err(KernelError::RotationConflict {
                reason: ConflictReason::StaleLength { expected: 1, actual: 2 },
                ..
            }) => {}
            Err(other) => anyhow::bail!("unexpected error: {other}"),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(ledger.change_history(&id).await?.len(), 2);
    ledger.verify_chain(&id).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_one_winner_memory() -> anyhow::Result<()> {
    one_winner_per_length(Arc::new(MemoryStore::new())).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_one_winner_sqlite() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    one_winner_per_length(Arc::new(SqliteStore::open(dir.path().join("ledger.db"))?)).await
}

/// Every contender keeps retrying against the refreshed chain, signing with
/// whatever key is current, until its own key is appended.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_losers_succeed_after_refetch() -> anyhow::Result<()> {
    let ledger = IdentityLedger::new(Arc::new(MemoryStore::new()));
    let alice = TestIdentity::new(Timestamp(100));
    let id = ledger.enroll(alice.genesis(), Timestamp(100)).await?;

    // Key custody shared by all contenders.
    let keys: Arc<Mutex<HashMap<Ed25519PublicKey, Keypair>>> = Arc::new(Mutex::new(
        [(alice.public_key(), alice.current().clone())].into_iter().collect(),
    ));

    let mut tasks = Vec::new();
    for _ in 0..CONTENDERS {
        let ledger = ledger.clone();
        let keys = keys.clone();
        tasks.push(tokio::spawn(async move {
            let next = Keypair::generate();
            keys.lock()
                .expect("keys lock")
                .insert(next.public_key(), next.clone());
            let mut conflicts = 0u32;
            loop {
                let history = ledger.change_history(&id).await?;
                let head = history.current_key().expect("enrolled");
                let signer = keys.lock().expect("keys lock")[&head].clone();
                let event = history
                    .next_rotation(next.public_key(), Timestamp(200))?
                    .sign(&signer)?;
                match ledger.append_rotation(&id, event, history.len()).await {
                    Ok(_) => return Ok::<u32, KernelError>(conflicts),
                    Err(e) if e.is_retryable() => conflicts += 1,
                    Err(e) => return Err(e),
                }
            }
        }));
    }

    let mut conflicts = 0;
    for task in tasks {
        conflicts += task.await??;
    }

    let history = ledger.verify_chain(&id).await?;
    assert_eq!(history.len(), 1 + CONTENDERS);
    tracing::debug!(conflicts, "contenders retried");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_kernel_rotations_keep_one_key() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let registry = vault_registry(
        store.clone(),
        Arc::new(trustgate::vault::MemoryKms::new()),
        Default::default(),
    );
    let kernel = TrustKernel::open(store.clone(), registry, KernelConfig::default()).await?;
    kernel
        .add_vault(trustgate::store::NamedVault::new("local", "memory", false))
        .await?;
    let kernel = Arc::new(kernel);
    let alice = kernel.create_identity(Some("local"), Timestamp(100)).await?;

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let kernel = kernel.clone();
        let alice = alice.clone();
        tasks.push(tokio::spawn(async move {
            kernel.rotate_key(&alice, Timestamp(200)).await
        }));
    }

    let mut winners = 0;
    for task in tasks {
        match task.await? {
            Ok(_) => winners += 1,
            Err(KernelError::RotationConflict { .. }) => {}
            Err(other) => anyhow::bail!("unexpected error: {other}"),
        }
    }
    assert_eq!(winners, 1);

    // Losing rotations discard the keys they generated.
    let local = kernel.vaults().get("local").await?;
    assert_eq!(local.list_handles().await?.len(), 2);
    assert_eq!(kernel.ledger().change_history(&alice.identifier).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_registry_without_vaults_cannot_create_identities() -> anyhow::Result<()> {
    let kernel = TrustKernel::open(
        Arc::new(MemoryStore::new()),
        VaultRegistry::new(),
        KernelConfig::default(),
    )
    .await?;
    assert!(matches!(
        kernel.create_identity(None, Timestamp(1)).await,
        Err(KernelError::Vault(_))
    ));
    Ok(())
}
