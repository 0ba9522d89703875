//! Chain validation: signature and hash-link checks over change histories.

use crate::change::{initial_change_hash, ChangeHistory, RotationEvent, EVENT_VERSION};
use crate::error::ValidationError;
use crate::types::Identifier;

/// Verify a genesis event: version, link to the initial change, self-signature.
pub fn verify_genesis(event: &RotationEvent) -> Result<(), ValidationError> {
    if event.version != EVENT_VERSION {
        return Err(ValidationError::UnsupportedVersion {
            index: 0,
            version: event.version,
        });
    }
    if event.previous != initial_change_hash() {
        return Err(ValidationError::BrokenLink { index: 0 });
    }
    let message = event.signing_message()?;
    event
        .public_key
        .verify(&message, &event.signature)
        .map_err(|_| ValidationError::SignatureFailed { index: 0 })
}

/// Verify that `next` (at position `index`) is a valid successor of `previous`.
///
/// Checks, in order:
/// - version
/// - hash link to `previous`
/// - timestamp is not earlier than `previous` (equal is allowed)
/// - signature by `previous.public_key`
pub fn verify_rotation(
    previous: &RotationEvent,
    next: &RotationEvent,
    index: usize,
) -> Result<(), ValidationError> {
    if next.version != EVENT_VERSION {
        return Err(ValidationError::UnsupportedVersion {
            index,
            version: next.version,
        });
    }

    if next.previous != previous.hash()? {
        return Err(ValidationError::BrokenLink { index });
    }

    if next.timestamp < previous.timestamp {
        return Err(ValidationError::TimestampRegression {
            index,
            previous: previous.timestamp,
            got: next.timestamp,
        });
    }

    let message = next.signing_message()?;
    previous
        .public_key
        .verify(&message, &next.signature)
        .map_err(|_| ValidationError::SignatureFailed { index })
}

/// Replay a whole history, stopping at the first broken link.
pub fn verify_chain(history: &ChangeHistory) -> Result<(), ValidationError> {
    let events = history.events();
    let genesis = events.first().ok_or(ValidationError::EmptyHistory)?;
    verify_genesis(genesis)?;

    for (index, pair) in events.windows(2).enumerate() {
        verify_rotation(&pair[0], &pair[1], index + 1)?;
    }

    Ok(())
}

/// Replay a history and check that it belongs to `identifier`.
pub fn verify_chain_for(
    identifier: &Identifier,
    history: &ChangeHistory,
) -> Result<(), ValidationError> {
    verify_chain(history)?;
    let derived = history.identifier().ok_or(ValidationError::EmptyHistory)?;
    if &derived != identifier {
        return Err(ValidationError::IdentifierMismatch {
            expected: *identifier,
            derived,
        });
    }
    Ok(())
}
