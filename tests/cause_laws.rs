//! Algebraic law property tests for the cause algebra.
//!
//! # Laws Tested
//!
//! - `sequential` and `parallel` are associative
//! - `Empty` is the identity of both
//! - `parallel` is commutative for equality
//! - interruption-only causes are told apart from real failures
//! - `map` preserves structure

#[macro_use]
mod common;

use common::*;
use fibra::types::{Cause, Defect, FiberId};
use proptest::prelude::*;

fn arb_leaf() -> impl Strategy<Value = Cause<u8>> {
    prop_oneof![
        Just(Cause::Empty),
        any::<u8>().prop_map(Cause::fail),
        "[a-z]{1,6}".prop_map(|s| Cause::die(Defect::new(s))),
        (0_u32..8).prop_map(|i| Cause::interrupt(FiberId::new_for_test(i, 0))),
    ]
}

fn arb_cause() -> impl Strategy<Value = Cause<u8>> {
    arb_leaf().prop_recursive(4, 32, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(l, r)| Cause::sequential(l, r)),
            (inner.clone(), inner).prop_map(|(l, r)| Cause::parallel(l, r)),
        ]
    })
}

fn arb_interrupt_only() -> impl Strategy<Value = Cause<u8>> {
    prop::collection::vec(0_u32..8, 1..5).prop_map(|ids| {
        ids.into_iter()
            .map(|i| Cause::interrupt(FiberId::new_for_test(i, 0)))
            .fold(Cause::Empty, Cause::parallel)
    })
}

proptest! {
    #![proptest_config(test_proptest_config(256))]

    #[test]
    fn sequential_is_associative(a in arb_cause(), b in arb_cause(), c in arb_cause()) {
        init_test_logging();
        let left = Cause::sequential(Cause::sequential(a.clone(), b.clone()), c.clone());
        let right = Cause::sequential(a, Cause::sequential(b, c));
        prop_assert_eq!(left, right);
    }

    #[test]
    fn parallel_is_associative(a in arb_cause(), b in arb_cause(), c in arb_cause()) {
        let left = Cause::parallel(Cause::parallel(a.clone(), b.clone()), c.clone());
        let right = Cause::parallel(a, Cause::parallel(b, c));
        prop_assert_eq!(left, right);
    }

    #[test]
    fn parallel_is_commutative(a in arb_cause(), b in arb_cause()) {
        prop_assert_eq!(Cause::parallel(a.clone(), b.clone()), Cause::parallel(b, a));
    }

    #[test]
    fn empty_is_identity(a in arb_cause()) {
        prop_assert_eq!(Cause::sequential(Cause::Empty, a.clone()), a.clone());
        prop_assert_eq!(Cause::sequential(a.clone(), Cause::Empty), a.clone());
        prop_assert_eq!(Cause::parallel(Cause::Empty, a.clone()), a.clone());
        prop_assert_eq!(Cause::parallel(a.clone(), Cause::Empty), a);
    }

    #[test]
    fn interrupt_only_is_not_a_real_failure(c in arb_interrupt_only()) {
        prop_assert!(c.is_interrupted_only());
        prop_assert!(!c.is_failure_or_die());
        prop_assert!(!c.interruptors().is_empty());
    }

    #[test]
    fn adding_a_failure_breaks_interrupt_only(c in arb_interrupt_only(), e in any::<u8>()) {
        let mixed = Cause::sequential(c, Cause::fail(e));
        prop_assert!(!mixed.is_interrupted_only());
        prop_assert!(mixed.is_failure_or_die());
        prop_assert_eq!(mixed.failures(), vec![e]);
    }

    #[test]
    fn map_preserves_leaf_counts(a in arb_cause()) {
        let mapped = a.clone().map(u16::from);
        prop_assert_eq!(mapped.failures().len(), a.failures().len());
        prop_assert_eq!(mapped.defects(), a.defects());
        prop_assert_eq!(mapped.interruptors(), a.interruptors());
    }

    #[test]
    fn strip_failures_keeps_defects_and_interrupts(a in arb_cause()) {
        let stripped = a.strip_failures();
        prop_assert!(!stripped.is_failure());
        prop_assert_eq!(stripped.defects(), a.defects());
        prop_assert_eq!(stripped.interruptors(), a.interruptors());
    }
}

#[test]
fn sequential_order_is_preserved_for_reporting() {
    init_test_logging();
    test_phase!("sequential_order_is_preserved_for_reporting");
    let c: Cause<&str> = Cause::sequential(Cause::fail("first"), Cause::fail("second"));
    assert_eq!(c.failures(), vec!["first", "second"]);
    assert_ne!(c, Cause::sequential(Cause::fail("second"), Cause::fail("first")));
    test_complete!("sequential_order_is_preserved_for_reporting");
}
