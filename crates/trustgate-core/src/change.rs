//! Change history: the append-only rotation chain of an identity.
//!
//! Every identity starts with a self-signed genesis event. Each later event
//! names a new public key and is signed by the key of the event before it.
//! Events are hash-linked, so a history cannot be edited or reordered without
//! breaking verification.
//!
//! A [`ChangeHistory`] is an arena of events addressed by [`EventIndex`]; the
//! current key lives at the last index. Cloning shares the arena, and appending
//! produces a new history without touching the original.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::canonical::{rotation_event_bytes, rotation_signing_bytes};
use crate::crypto::{Blake3Hash, Ed25519PublicKey, Ed25519Signature, Keypair};
use crate::error::CoreError;
use crate::types::{Identifier, Timestamp};

/// The current rotation event schema version.
pub const EVENT_VERSION: u8 = 0;

/// Seed of the hash that genesis events link to.
pub const INITIAL_CHANGE: &[u8] = b"trustgate-initial-change";

/// The `previous` hash every genesis event must carry.
pub fn initial_change_hash() -> Blake3Hash {
    Blake3Hash::hash(INITIAL_CHANGE)
}

/// A signed rotation event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationEvent {
    /// Schema version.
    pub version: u8,
    /// Hash of the preceding event ([`initial_change_hash`] for genesis).
    pub previous: Blake3Hash,
    /// The key this event makes current.
    pub public_key: Ed25519PublicKey,
    /// Author-claimed time of the rotation.
    pub timestamp: Timestamp,
    /// Signature by the previous key (by `public_key` itself for genesis).
    pub signature: Ed25519Signature,
}

impl RotationEvent {
    /// The bytes covered by `signature`.
    pub fn signing_message(&self) -> Result<Vec<u8>, CoreError> {
        rotation_signing_bytes(self.version, &self.previous, &self.public_key, self.timestamp)
    }

    /// Content hash of this event, used as the next event's `previous`.
    pub fn hash(&self) -> Result<Blake3Hash, CoreError> {
        let bytes = rotation_event_bytes(
            self.version,
            &self.previous,
            &self.public_key,
            self.timestamp,
            &self.signature,
        )?;
        Ok(Blake3Hash::hash(&bytes))
    }

    /// Whether this event links to the initial change hash.
    pub fn is_genesis(&self) -> bool {
        self.previous == initial_change_hash()
    }
}

/// A rotation that has not been signed yet.
///
/// Signing goes through a vault in production, so the message is exposed and
/// the signature attached afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedRotation {
    pub previous: Blake3Hash,
    pub public_key: Ed25519PublicKey,
    pub timestamp: Timestamp,
}

impl UnsignedRotation {
    /// A genesis rotation for `public_key`.
    pub fn genesis(public_key: Ed25519PublicKey, timestamp: Timestamp) -> Self {
        Self {
            previous: initial_change_hash(),
            public_key,
            timestamp,
        }
    }

    /// The bytes that must be signed.
    pub fn signing_message(&self) -> Result<Vec<u8>, CoreError> {
        rotation_signing_bytes(EVENT_VERSION, &self.previous, &self.public_key, self.timestamp)
    }

    /// Attach a signature produced elsewhere.
    pub fn with_signature(self, signature: Ed25519Signature) -> RotationEvent {
        RotationEvent {
            version: EVENT_VERSION,
            previous: self.previous,
            public_key: self.public_key,
            timestamp: self.timestamp,
            signature,
        }
    }

    /// Sign with an in-process keypair.
    pub fn sign(self, keypair: &Keypair) -> Result<RotationEvent, CoreError> {
        let message = self.signing_message()?;
        let signature = keypair.sign(&message);
        Ok(self.with_signature(signature))
    }
}

/// Position of an event in a change history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventIndex(pub usize);

/// The ordered rotation events of one identity.
///
/// Construction does not verify; see [`crate::validation::verify_chain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeHistory {
    events: Arc<Vec<RotationEvent>>,
}

impl ChangeHistory {
    /// A history holding only the genesis event.
    pub fn from_genesis(genesis: RotationEvent) -> Self {
        Self {
            events: Arc::new(vec![genesis]),
        }
    }

    /// Build from an ordered list of events.
    pub fn from_events(events: Vec<RotationEvent>) -> Self {
        Self {
            events: Arc::new(events),
        }
    }

    /// Number of events (the chain length used for optimistic concurrency).
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the history has no events at all.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Event at a given index.
    pub fn get(&self, index: EventIndex) -> Option<&RotationEvent> {
        self.events.get(index.0)
    }

    /// Index of the current (last) event.
    pub fn head(&self) -> Option<EventIndex> {
        self.events.len().checked_sub(1).map(EventIndex)
    }

    /// The genesis event.
    pub fn genesis(&self) -> Option<&RotationEvent> {
        self.events.first()
    }

    /// The current (last) event.
    pub fn current(&self) -> Option<&RotationEvent> {
        self.head().and_then(|i| self.get(i))
    }

    /// The current public key.
    pub fn current_key(&self) -> Option<Ed25519PublicKey> {
        self.current().map(|e| e.public_key)
    }

    /// The identifier derived from the genesis key.
    pub fn identifier(&self) -> Option<Identifier> {
        self.genesis().map(|e| Identifier::derive(&e.public_key))
    }

    /// Whether `key` appears anywhere in this history.
    pub fn contains_key(&self, key: &Ed25519PublicKey) -> bool {
        self.events.iter().any(|e| &e.public_key == key)
    }

    /// Iterate events in order.
    pub fn iter(&self) -> impl Iterator<Item = &RotationEvent> {
        self.events.iter()
    }

    /// All events as a slice.
    pub fn events(&self) -> &[RotationEvent] {
        &self.events
    }

    /// Prepare the next rotation on top of the current head.
    pub fn next_rotation(
        &self,
        public_key: Ed25519PublicKey,
        timestamp: Timestamp,
    ) -> Result<UnsignedRotation, CoreError> {
        let previous = match self.current() {
            Some(event) => event.hash()?,
            None => initial_change_hash(),
        };
        Ok(UnsignedRotation {
            previous,
            public_key,
            timestamp,
        })
    }

    /// A new history with `event` appended; `self` is left untouched.
    pub fn appended(&self, event: RotationEvent) -> Self {
        let mut events = Vec::with_capacity(self.events.len() + 1);
        events.extend(self.events.iter().cloned());
        events.push(event);
        Self {
            events: Arc::new(events),
        }
    }

    /// Serialize to CBOR (the `change_history` column).
    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self.events.as_slice(), &mut buf)
            .map_err(|e| CoreError::EncodingError(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        let events: Vec<RotationEvent> =
            ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))?;
        Ok(Self::from_events(events))
    }
}
