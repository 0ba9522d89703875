//! Expression evaluation.
//!
//! Evaluation is total: every expression yields a boolean for every set of
//! facts. A fact that is missing, or whose value has a different shape than
//! the literal, makes the comparison false.

use trustgate_core::AttributeValue;

use crate::expr::{Expr, Literal};
use crate::facts::Facts;

/// Evaluate `expr` against `facts`, short-circuiting left to right.
pub fn evaluate(expr: &Expr, facts: &Facts) -> bool {
    match expr {
        Expr::Const(b) => *b,
        Expr::Eq(fact, literal) => facts.get(fact).is_some_and(|v| matches(v, literal)),
        Expr::In(fact, literals) => match facts.get(fact) {
            Some(AttributeValue::Set(members)) => literals
                .iter()
                .any(|l| matches!(l, Literal::Str(s) if members.contains(s))),
            Some(value) => literals.iter().any(|l| matches(value, l)),
            None => false,
        },
        Expr::Contains(fact, literal) => match (facts.get(fact), literal) {
            (Some(AttributeValue::Set(members)), Literal::Str(s)) => members.contains(s),
            _ => false,
        },
        Expr::Present(fact) => facts.contains(fact),
        Expr::And(exprs) => exprs.iter().all(|e| evaluate(e, facts)),
        Expr::Or(exprs) => exprs.iter().any(|e| evaluate(e, facts)),
        Expr::Not(inner) => !evaluate(inner, facts),
    }
}

fn matches(value: &AttributeValue, literal: &Literal) -> bool {
    match (value, literal) {
        (AttributeValue::Text(a), Literal::Str(b)) => a == b,
        (AttributeValue::Integer(a), Literal::Int(b)) => a == b,
        (AttributeValue::Bool(a), Literal::Bool(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn facts() -> Facts {
        Facts::new()
            .with("subject.role", "admin")
            .with("subject.level", 3i64)
            .with("subject.trusted", true)
            .with("subject.groups", AttributeValue::set(["ops", "dev"]))
    }

    #[test]
    fn test_leaves() {
        let f = facts();
        assert!(evaluate(&Expr::eq("subject.role", "admin"), &f));
        assert!(!evaluate(&Expr::eq("subject.role", "ops"), &f));
        assert!(evaluate(&Expr::eq("subject.level", 3i64), &f));
        assert!(evaluate(&Expr::eq("subject.trusted", true), &f));
        assert!(evaluate(&Expr::is_in("subject.role", ["ops", "admin"]), &f));
        assert!(evaluate(&Expr::is_in("subject.groups", ["dev"]), &f));
        assert!(!evaluate(&Expr::is_in("subject.groups", ["sales"]), &f));
        assert!(evaluate(&Expr::contains("subject.groups", "ops"), &f));
        assert!(evaluate(&Expr::present("subject.level"), &f));
    }

    #[test]
    fn test_shape_mismatch_is_false() {
        let f = facts();
        assert!(!evaluate(&Expr::eq("subject.level", "3"), &f));
        assert!(!evaluate(&Expr::eq("subject.groups", "ops"), &f));
        assert!(!evaluate(&Expr::contains("subject.role", "adm"), &f));
    }

    #[test]
    fn test_unknown_fact_is_absent() {
        let f = facts();
        assert!(!evaluate(&Expr::eq("subject.missing", "x"), &f));
        assert!(!evaluate(&Expr::is_in("subject.missing", ["x"]), &f));
        assert!(!evaluate(&Expr::present("subject.missing"), &f));
        assert!(evaluate(&Expr::not(Expr::present("subject.missing")), &f));
    }

    #[test]
    fn test_empty_connectives() {
        let f = Facts::new();
        assert!(evaluate(&Expr::and([]), &f));
        assert!(!evaluate(&Expr::or([]), &f));
    }

    fn arb_literal() -> impl Strategy<Value = Literal> {
        prop_oneof![
            "[a-c]{1,2}".prop_map(Literal::Str),
            (0i64..3).prop_map(Literal::Int),
            any::<bool>().prop_map(Literal::Bool),
        ]
    }

    fn arb_fact() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("subject.role".to_owned()),
            Just("subject.groups".to_owned()),
            Just("subject.level".to_owned()),
            Just("subject.unknown".to_owned()),
        ]
    }

    fn arb_expr() -> impl Strategy<Value = Expr> {
        let leaf = prop_oneof![
            any::<bool>().prop_map(Expr::Const),
            (arb_fact(), arb_literal()).prop_map(|(f, l)| Expr::Eq(f, l)),
            (arb_fact(), prop::collection::vec(arb_literal(), 0..3))
                .prop_map(|(f, l)| Expr::In(f, l)),
            (arb_fact(), arb_literal()).prop_map(|(f, l)| Expr::Contains(f, l)),
            arb_fact().prop_map(Expr::Present),
        ];
        leaf.prop_recursive(4, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Expr::And),
                prop::collection::vec(inner.clone(), 0..4).prop_map(Expr::Or),
                inner.prop_map(Expr::not),
            ]
        })
    }

    fn arb_facts() -> impl Strategy<Value = Facts> {
        (
            prop::option::of("[a-c]{1,2}"),
            prop::option::of(prop::collection::btree_set("[a-c]{1,2}", 0..3)),
            prop::option::of(0i64..3),
        )
            .prop_map(|(role, groups, level)| {
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
                facts
            })
    }

    proptest! {
        #[test]
        fn prop_evaluation_is_deterministic(expr in arb_expr(), facts in arb_facts()) {
            let first = evaluate(&expr, &facts);
            prop_assert_eq!(evaluate(&expr.clone(), &facts.clone()), first);
        }

        #[test]
        fn prop_not_inverts(expr in arb_expr(), facts in arb_facts()) {
            prop_assert_eq!(evaluate(&Expr::not(expr.clone()), &facts), !evaluate(&expr, &facts));
        }

        #[test]
        fn prop_text_form_evaluates_identically(expr in arb_expr(), facts in arb_facts()) {
            let reparsed: Expr = expr.to_string().parse().unwrap();
            prop_assert_eq!(evaluate(&reparsed, &facts), evaluate(&expr, &facts));
        }
    }
}
