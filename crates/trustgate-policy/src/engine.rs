//! The policy engine: stored policies, a read snapshot, and evaluation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::Mutex;
use trustgate_core::Blake3Hash;
use trustgate_store::Store;

use crate::error::Result;
use crate::eval::evaluate;
use crate::expr::Expr;
use crate::facts::Facts;

/// A policy bound to one (resource, action) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    pub resource: String,
    pub action: String,
    pub expression: Expr,
    /// Blake3 of the stored expression blob.
    pub version: Blake3Hash,
}

impl Policy {
    /// Fails with `TooDeep` for expressions nested beyond [`MAX_DEPTH`](crate::MAX_DEPTH).
    pub fn new(resource: impl Into<String>, action: impl Into<String>, expression: Expr) -> Result<Self> {
        expression.check_depth()?;
        let version = expression.version()?;
        Ok(Self {
            resource: resource.into(),
            action: action.into(),
            expression,
            version,
        })
    }
}

/// Outcome of a policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Allow,
    Deny,
}

/// An effect plus the version of the policy that produced it.
///
/// `policy_version` is `None` when no policy exists for the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub effect: Effect,
    pub policy_version: Option<Blake3Hash>,
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        self.effect == Effect::Allow
    }
}

type Snapshot = HashMap<(String, String), Arc<Policy>>;

/// Policies keyed by exact (resource, action), evaluated with default deny.
///
/// Evaluation reads an immutable snapshot; the lock is held only long enough
/// to clone the `Arc`. Writers persist first, then publish a modified copy of
/// the snapshot. Writers are serialized so no update is lost.
pub struct PolicyEngine<S: Store> {
    store: Arc<S>,
    snapshot: RwLock<Arc<Snapshot>>,
    writer: Mutex<()>,
}

impl<S: Store> PolicyEngine<S> {
    /// Engine over `store` with an empty snapshot. Call [`reload`](Self::reload)
    /// to pick up persisted policies.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            snapshot: RwLock::new(Arc::new(Snapshot::new())),
            writer: Mutex::new(()),
        }
    }

    /// Engine over `store`, loaded with every persisted policy.
    pub async fn open(store: Arc<S>) -> Result<Self> {
        let engine = Self::new(store);
        engine.reload().await?;
        Ok(engine)
    }

    /// Rebuild the snapshot from the store.
    pub async fn reload(&self) -> Result<usize> {
        let _guard = self.writer.lock().await;
        let mut snapshot = Snapshot::new();
        for record in self.store.list_policies().await? {
            let expression = Expr::from_bytes(&record.expression)?;
            let policy = Policy::new(record.resource.clone(), record.action.clone(), expression)?;
            snapshot.insert((record.resource, record.action), Arc::new(policy));
        }
        let count = snapshot.len();
        self.publish(snapshot);
        tracing::debug!(count, "loaded policies");
        Ok(count)
    }

    /// Replace the policy for (resource, action).
    pub async fn set_policy(&self, resource: &str, action: &str, expression: Expr) -> Result<Arc<Policy>> {
        let policy = Arc::new(Policy::new(resource, action, expression)?);
        let blob = policy.expression.to_bytes()?;

        let _guard = self.writer.lock().await;
        self.store.put_policy(resource, action, &blob).await?;
        let mut snapshot = (*self.snapshot()).clone();
        snapshot.insert((resource.to_owned(), action.to_owned()), policy.clone());
        self.publish(snapshot);

        tracing::debug!(resource, action, version = %policy.version, "policy set");
        Ok(policy)
    }

    /// Parse `text` and set it as the policy for (resource, action).
    pub async fn set_policy_text(&self, resource: &str, action: &str, text: &str) -> Result<Arc<Policy>> {
        let expression: Expr = text.parse()?;
        self.set_policy(resource, action, expression).await
    }

    /// Remove the policy for (resource, action). Later evaluations deny.
    pub async fn delete_policy(&self, resource: &str, action: &str) -> Result<bool> {
        let _guard = self.writer.lock().await;
        let deleted = self.store.delete_policy(resource, action).await?;
        let mut snapshot = (*self.snapshot()).clone();
        snapshot.remove(&(resource.to_owned(), action.to_owned()));
        self.publish(snapshot);

        tracing::debug!(resource, action, deleted, "policy deleted");
        Ok(deleted)
    }

    pub fn policy(&self, resource: &str, action: &str) -> Option<Arc<Policy>> {
        self.snapshot()
            .get(&(resource.to_owned(), action.to_owned()))
            .cloned()
    }

    /// All policies, ordered by (resource, action).
    pub fn policies(&self) -> Vec<Arc<Policy>> {
        let mut policies: Vec<_> = self.snapshot().values().cloned().collect();
        policies.sort_by(|a, b| (&a.resource, &a.action).cmp(&(&b.resource, &b.action)));
        policies
    }

    /// Evaluate the policy for (resource, action) against `facts`.
    ///
    /// A missing policy denies.
    pub fn evaluate(&self, resource: &str, action: &str, facts: &Facts) -> Verdict {
        match self.policy(resource, action) {
            Some(policy) => Verdict {
                effect: if evaluate(&policy.expression, facts) {
                    Effect::Allow
                } else {
                    Effect::Deny
                },
                policy_version: Some(policy.version),
            },
            None => Verdict {
                effect: Effect::Deny,
                policy_version: None,
            },
        }
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        // The guarded value is only ever replaced whole, so a poisoned lock
        // still holds a consistent snapshot.
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, snapshot: Snapshot) {
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);
    }
}
