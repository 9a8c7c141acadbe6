//! Randomized check that simplification never changes a formula's value.

use nodal_smt::simplify::simplify;
use nodal_smt::solver::Model;
use nodal_smt::terms::SmtTerm;
use proptest::prelude::*;

fn arb_int_term() -> impl Strategy<Value = SmtTerm> {
    let leaf = prop_oneof![
        (-4i64..=4).prop_map(SmtTerm::int),
        Just(SmtTerm::var("x")),
        Just(SmtTerm::var("y")),
    ];
    leaf.prop_recursive(2, 8, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(a, b)| a.add(b)),
            (inner.clone(), inner).prop_map(|(a, b)| a.sub(b)),
        ]
    })
}

fn arb_bool_term() -> impl Strategy<Value = SmtTerm> {
    let leaf = prop_oneof![
        any::<bool>().prop_map(SmtTerm::bool),
        Just(SmtTerm::var("p")),
        Just(SmtTerm::var("q")),
        (arb_int_term(), arb_int_term()).prop_map(|(a, b)| a.le(b)),
        (arb_int_term(), arb_int_term()).prop_map(|(a, b)| a.eq(b)),
        (arb_int_term(), arb_int_term()).prop_map(|(a, b)| a.gt(b)),
    ];
    leaf.prop_recursive(3, 24, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(SmtTerm::and),
            prop::collection::vec(inner.clone(), 0..4).prop_map(SmtTerm::or),
            inner.clone().prop_map(SmtTerm::not),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| a.implies(b)),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| a.iff(b)),
            (inner.clone(), inner.clone(), inner).prop_map(|(c, t, e)| SmtTerm::ite(c, t, e)),
        ]
    })
}

proptest! {
    #[test]
    fn simplification_preserves_value(
        term in arb_bool_term(),
        x in -8i64..=8,
        y in -8i64..=8,
        p in any::<bool>(),
        q in any::<bool>(),
    ) {
        let mut model = Model::default();
        model.insert_int("x", x);
        model.insert_int("y", y);
        model.insert_bool("p", p);
        model.insert_bool("q", q);

        let before = model.eval_bool(&term);
        let after = model.eval_bool(&simplify(&term));
        prop_assert_eq!(before, after);
    }

    #[test]
    fn simplification_is_idempotent(term in arb_bool_term()) {
        let once = simplify(&term);
        prop_assert_eq!(simplify(&once), once);
    }
}
