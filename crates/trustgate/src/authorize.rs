//! Authorization decisions and their audit trail.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use trustgate_core::{AttributeMap, Blake3Hash, Identifier, Timestamp};
use trustgate_policy::{Effect, Facts, PolicyEngine};
use trustgate_store::Store;

use crate::attestation::AttestationStore;
use crate::error::{KernelError, Result};
use crate::ledger::IdentityLedger;

/// Why a request was denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenialReason {
    /// The subject is not enrolled.
    UnknownIdentity,
    /// The subject's change history failed verification.
    InvalidAttestation(String),
    /// No policy exists for the (resource, action) pair.
    PolicyMissing,
    /// The policy evaluated to false.
    PolicyDenied,
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenialReason::UnknownIdentity => f.write_str("unknown identity"),
            DenialReason::InvalidAttestation(cause) => write!(f, "invalid attestation: {}", cause),
            DenialReason::PolicyMissing => f.write_str("no policy"),
            DenialReason::PolicyDenied => f.write_str("policy denied"),
        }
    }
}

/// Allow, or deny with a reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Allow,
    Deny(DenialReason),
}

/// The result of one authorization request, with what it was based on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub subject: Identifier,
    pub resource: String,
    pub action: String,
    pub at: Timestamp,
    pub outcome: Outcome,
    /// Subject attributes in force at `at`. Empty when the subject could not
    /// be resolved.
    pub attributes: AttributeMap,
    /// Version of the policy evaluated, if one existed.
    pub policy_version: Option<Blake3Hash>,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        self.outcome == Outcome::Allow
    }

    pub fn denial(&self) -> Option<&DenialReason> {
        match &self.outcome {
            Outcome::Allow => None,
            Outcome::Deny(reason) => Some(reason),
        }
    }
}

/// Receives every decision, allow or deny.
pub trait AuditSink: Send + Sync {
    fn record(&self, decision: &Decision);
}

/// Emits decisions as `tracing` events under the `trustgate::audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, decision: &Decision) {
        let policy_version = decision.policy_version.map(|v| v.to_hex());
        match decision.denial() {
            None => tracing::info!(
                target: "trustgate::audit",
                subject = %decision.subject,
                resource = %decision.resource,
                action = %decision.action,
                at = %decision.at,
                policy_version = ?policy_version,
                attributes = decision.attributes.len(),
                "allow"
            ),
            Some(reason) => tracing::info!(
                target: "trustgate::audit",
                subject = %decision.subject,
                resource = %decision.resource,
                action = %decision.action,
                at = %decision.at,
                policy_version = ?policy_version,
                %reason,
                "deny"
            ),
        }
    }
}

/// Keeps decisions in memory, for inspection in tests and tooling.
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    decisions: Mutex<Vec<Decision>>,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decisions(&self) -> Vec<Decision> {
        self.decisions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, decision: &Decision) {
        self.decisions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(decision.clone());
    }
}

/// Combines ledger, attestations and policies into decisions.
pub struct Authorizer<S: Store> {
    ledger: IdentityLedger<S>,
    attestations: AttestationStore<S>,
    policies: Arc<PolicyEngine<S>>,
    audit: Arc<dyn AuditSink>,
    verify_chain: bool,
}

impl<S: Store> Authorizer<S> {
    pub fn new(
        ledger: IdentityLedger<S>,
        attestations: AttestationStore<S>,
        policies: Arc<PolicyEngine<S>>,
        audit: Arc<dyn AuditSink>,
        verify_chain: bool,
    ) -> Self {
        Self {
            ledger,
            attestations,
            policies,
            audit,
            verify_chain,
        }
    }

    /// Decide whether `subject` may perform `action` on `resource` at `at`.
    ///
    /// Identity failures become denials. Storage failures are returned as
    /// errors and produce no decision.
    pub async fn authorize(
        &self,
        subject: &Identifier,
        resource: &str,
        action: &str,
        at: Timestamp,
    ) -> Result<Decision> {
        let mut decision = Decision {
            subject: *subject,
            resource: resource.to_owned(),
            action: action.to_owned(),
            at,
            outcome: Outcome::Deny(DenialReason::PolicyMissing),
            attributes: AttributeMap::new(),
            policy_version: None,
        };

        match self.resolve(subject, at).await {
            Ok(attributes) => {
                let facts = Facts::for_request(subject, &attributes, resource, action);
                let verdict = self.policies.evaluate(resource, action, &facts);
                decision.outcome = match (verdict.effect, verdict.policy_version) {
                    (Effect::Allow, _) => Outcome::Allow,
                    (Effect::Deny, Some(_)) => Outcome::Deny(DenialReason::PolicyDenied),
                    (Effect::Deny, None) => Outcome::Deny(DenialReason::PolicyMissing),
                };
                decision.policy_version = verdict.policy_version;
                decision.attributes = attributes;
            }
            Err(KernelError::UnknownIdentity(_)) => {
                decision.outcome = Outcome::Deny(DenialReason::UnknownIdentity);
            }
            Err(KernelError::InvalidAttestation(e)) => {
                decision.outcome = Outcome::Deny(DenialReason::InvalidAttestation(e.to_string()));
            }
            Err(e) => {
                tracing::error!(%subject, resource, action, error = %e, "authorization failed");
                return Err(e);
            }
        }

        self.audit.record(&decision);
        Ok(decision)
    }

    async fn resolve(&self, subject: &Identifier, at: Timestamp) -> Result<AttributeMap> {
        if self.verify_chain {
            self.ledger.verify_chain(subject).await?;
        } else {
            self.ledger.current_key(subject).await?;
        }
        self.attestations.attributes_of(subject, at).await
    }
}
