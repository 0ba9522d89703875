//! Proptest generators for property-based testing.

use proptest::prelude::*;

use trustgate_core::{
    AttributeMap, AttributeValue, ChangeHistory, Keypair, RotationEvent, Timestamp,
    UnsignedRotation,
};
use trustgate_policy::{Expr, Facts, Literal};

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a reasonable timestamp.
pub fn timestamp() -> impl Strategy<Value = Timestamp> {
    (0i64..=4_000_000_000i64).prop_map(Timestamp)
}

/// Generate an attribute value of any known kind.
pub fn attribute_value() -> impl Strategy<Value = AttributeValue> {
    prop_oneof![
        "[a-z]{1,8}".prop_map(AttributeValue::Text),
        any::<bool>().prop_map(AttributeValue::Bool),
        any::<i64>().prop_map(AttributeValue::Integer),
        prop::collection::btree_set("[a-z]{1,4}", 0..4).prop_map(AttributeValue::Set),
    ]
}

/// Generate an attribute map with up to `max_len` entries.
pub fn attribute_map(max_len: usize) -> impl Strategy<Value = AttributeMap> {
    prop::collection::btree_map("[a-z]{1,6}", attribute_value(), 0..=max_len)
}

/// Parameters for generating a valid change history.
#[derive(Debug, Clone)]
pub struct ChainParams {
    pub seeds: Vec<[u8; 32]>,
    pub start: i64,
    /// Non-negative gaps between consecutive events; zero repeats a timestamp.
    pub gaps: Vec<i64>,
}

impl Arbitrary for ChainParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (1usize..=6)
            .prop_flat_map(|len| {
                (
                    prop::collection::vec(any::<[u8; 32]>(), len),
                    0i64..=1_700_000_000i64,
                    prop::collection::vec(0i64..=3600, len - 1),
                )
            })
            .prop_map(|(seeds, start, gaps)| ChainParams { seeds, start, gaps })
            .boxed()
    }
}

/// Build the history described by `params`: each key signs its successor.
pub fn chain_from_params(params: &ChainParams) -> ChangeHistory {
    let keypairs: Vec<Keypair> = params.seeds.iter().map(Keypair::from_seed).collect();
    let mut at = Timestamp(params.start);
    let genesis = UnsignedRotation::genesis(keypairs[0].public_key(), at)
        .sign(&keypairs[0])
        .expect("genesis encodes");
    let mut history = ChangeHistory::from_genesis(genesis);

    for (pair, gap) in keypairs.windows(2).zip(&params.gaps) {
        at = at.add_secs(*gap);
        let event = history
            .next_rotation(pair[1].public_key(), at)
            .and_then(|unsigned| unsigned.sign(&pair[0]))
            .expect("rotation encodes");
        history = history.appended(event);
    }
    history
}

/// A single-event corruption of a change history.
#[derive(Debug, Clone, Copy)]
pub enum ChainMutation {
    FlipSignature(usize),
    AlterKey(usize),
    /// Move the event's timestamp before its predecessor's.
    ReorderTimestamp(usize),
}

impl ChainMutation {
    /// Any mutation targeting an event of a chain of length `len`.
    pub fn strategy(len: usize) -> impl Strategy<Value = ChainMutation> {
        let index = 0..len;
        prop_oneof![
            index.clone().prop_map(ChainMutation::FlipSignature),
            index.clone().prop_map(ChainMutation::AlterKey),
            index.prop_map(ChainMutation::ReorderTimestamp),
        ]
    }

    /// `history` with this mutation applied.
    pub fn apply(self, history: &ChangeHistory) -> ChangeHistory {
        let mut events: Vec<RotationEvent> = history.events().to_vec();
        match self {
            ChainMutation::FlipSignature(i) => events[i].signature.0[0] ^= 0x01,
            ChainMutation::AlterKey(i) => {
                let mut bytes = events[i].public_key.0;
                bytes[0] ^= 0x01;
                events[i].public_key = Keypair::from_seed(&bytes).public_key();
            }
            ChainMutation::ReorderTimestamp(i) => {
                let floor = if i == 0 {
                    events[0].timestamp
                } else {
                    events[i - 1].timestamp
                };
                events[i].timestamp = floor.add_secs(-1);
            }
        }
        ChangeHistory::from_events(events)
    }
}

/// Generate a fact name from a small fixed vocabulary, including one that is
/// never present.
pub fn fact_name() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("subject.role".to_owned()),
        Just("subject.groups".to_owned()),
        Just("subject.level".to_owned()),
        Just("subject.missing".to_owned()),
        Just("action.id".to_owned()),
    ]
}

/// Generate a literal.
pub fn literal() -> impl Strategy<Value = Literal> {
    prop_oneof![
        "[a-c]{1,2}".prop_map(Literal::Str),
        (0i64..3).prop_map(Literal::Int),
        any::<bool>().prop_map(Literal::Bool),
    ]
}

/// Generate a policy expression of bounded depth.
pub fn expr() -> impl Strategy<Value = Expr> {
    let leaf = prop_oneof![
        any::<bool>().prop_map(Expr::Const),
        (fact_name(), literal()).prop_map(|(f, l)| Expr::Eq(f, l)),
        (fact_name(), prop::collection::vec(literal(), 0..3)).prop_map(|(f, l)| Expr::In(f, l)),
        (fact_name(), literal()).prop_map(|(f, l)| Expr::Contains(f, l)),
        fact_name().prop_map(Expr::Present),
    ];
    leaf.prop_recursive(4, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Expr::And),
            prop::collection::vec(inner.clone(), 0..4).prop_map(Expr::Or),
            inner.prop_map(Expr::not),
        ]
    })
}

/// Generate facts over the [`fact_name`] vocabulary.
pub fn facts() -> impl Strategy<Value = Facts> {
    (
        prop::option::of("[a-c]{1,2}"),
        prop::option::of(prop::collection::btree_set("[a-c]{1,2}", 0..3)),
        prop::option::of(0i64..3),
        prop::option::of("[a-c]{1,2}"),
    )
        .prop_map(|(role, groups, level, action)| {
            let mut facts = Facts::new();
            if let Some(role) = role {
                facts.insert("subject.role", role);
            }
            if let Some(groups) = groups {
                facts.insert("subject.groups", AttributeValue::Set(groups));
            }
            if let Some(level) = level {
                facts.insert("subject.level", level);
            }
            if let Some(action) = action {
                facts.insert("action.id", action);
            }
            facts
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use trustgate_core::verify_chain;
    use trustgate_policy::evaluate;

    proptest! {
        #[test]
        fn test_generated_chains_verify(params: ChainParams) {
            let history = chain_from_params(&params);
            prop_assert_eq!(history.len(), params.seeds.len());
            prop_assert!(verify_chain(&history).is_ok());
        }

        #[test]
        fn test_any_single_mutation_is_detected(
            (params, mutation) in any::<ChainParams>().prop_flat_map(|params| {
                let len = params.seeds.len();
                (Just(params), ChainMutation::strategy(len))
            })
        ) {
            let history = chain_from_params(&params);
            let mutated = mutation.apply(&history);
            prop_assert!(verify_chain(&mutated).is_err(), "{:?} went undetected", mutation);
        }

        #[test]
        fn test_evaluation_is_deterministic(expr in expr(), facts in facts()) {
            prop_assert_eq!(evaluate(&expr, &facts), evaluate(&expr, &facts));
        }
    }
}
