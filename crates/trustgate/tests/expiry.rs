//! Expired attestations never reach policy facts.

use std::sync::Arc;

use proptest::prelude::*;
use trustgate::store::MemoryStore;
use trustgate::{AttestationStore, IdentityLedger, Timestamp};
use trustgate_testkit::{text_attributes, TestIdentity};

/// One attestation: (value, added, optional lifetime).
fn attestation() -> impl Strategy<Value = (String, i64, Option<i64>)> {
    ("[a-d]", 0i64..100, prop::option::of(1i64..50))
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_attributes_only_come_from_live_attestations(
        attestations in prop::collection::vec(attestation(), 1..8),
        at in 0i64..160,
    ) {
        let rt = runtime();
        let resolved = rt.block_on(async {
            let store = Arc::new(MemoryStore::new());
            let ledger = IdentityLedger::new(store.clone());
            let attestations_store = AttestationStore::new(store, ledger.clone());

            let subject = TestIdentity::new(Timestamp(0));
            let id = ledger.enroll(subject.genesis(), Timestamp(0)).await?;
            let authority = TestIdentity::new(Timestamp(0));
            let authority_id = attestations_store
                .add_authority(authority.history().clone(), "authority:4000")
                .await?;

            for (value, added, lifetime) in &attestations {
                attestations_store
                    .attest(
                        &id,
                        text_attributes(&[("role", value.as_str())]),
                        lifetime.map(|l| Timestamp(added + l)),
                        &authority_id,
                        Timestamp(*added),
                    )
                    .await?;
            }
            attestations_store.attributes_of(&id, Timestamp(at)).await
        }).expect("attestations resolve");

        // The newest live attestation by `added` wins; later writes break ties.
        let expected = attestations
            .iter()
            .enumerate()
            .filter(|(_, (_, added, lifetime))| {
                *added <= at && lifetime.map_or(true, |l| at < added + l)
            })
            .max_by_key(|(i, (_, added, _))| (*added, *i))
            .map(|(_, (value, _, _))| text_attributes(&[("role", value.as_str())]))
            .unwrap_or_default();
        prop_assert_eq!(resolved, expected);
    }
}
