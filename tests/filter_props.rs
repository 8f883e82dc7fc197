use std::collections::BTreeSet;

use apparatus::{BitMask, Filter, Flag, Flagmark};
use proptest::prelude::*;

fn bits() -> impl Strategy<Value = BTreeSet<usize>> {
    prop::collection::btree_set(0usize..300, 0..24)
}

const USER_FLAGS: [Flag; 6] = [Flag::A, Flag::B, Flag::C, Flag::D, Flag::E, Flag::F];

fn flagmark_of(selection: &[bool]) -> Flagmark {
    USER_FLAGS
        .iter()
        .zip(selection)
        .fold(Flagmark::NONE, |mark, (&flag, &on)| mark.with(flag, on))
}

proptest! {
    #[test]
    fn masks_match_their_sets(a in bits()) {
        let mask = BitMask::from_bits(a.iter().copied());
        prop_assert_eq!(mask.count(), a.len());
        prop_assert_eq!(mask.iter().collect::<Vec<_>>(), a.iter().copied().collect::<Vec<_>>());
        prop_assert_eq!(mask.is_empty(), a.is_empty());
    }

    #[test]
    fn inclusion_agrees_with_subsets(a in bits(), b in bits()) {
        let ma = BitMask::from_bits(a.iter().copied());
        let mb = BitMask::from_bits(b.iter().copied());
        prop_assert_eq!(ma.includes(&mb), b.is_subset(&a));
        prop_assert_eq!(ma.intersects(&mb), !a.is_disjoint(&b));
        prop_assert_eq!(mb.difference_count(&ma), b.difference(&a).count());
        prop_assert!(ma.includes(&ma));
    }

    #[test]
    fn unions_include_both_sides(a in bits(), b in bits()) {
        let mut union = BitMask::from_bits(a.iter().copied());
        let mb = BitMask::from_bits(b.iter().copied());
        union.union_with(&mb);
        prop_assert!(union.includes(&BitMask::from_bits(a.iter().copied())));
        prop_assert!(union.includes(&mb));
        prop_assert_eq!(union.count(), a.union(&b).count());
    }

    #[test]
    fn clearing_restores_equality(a in bits(), extra in 300usize..600) {
        let plain = BitMask::from_bits(a.iter().copied());
        let mut grown = plain.clone();
        grown.set(extra);
        prop_assert_ne!(&grown, &plain);
        prop_assert!(grown.clear(extra));
        prop_assert_eq!(grown, plain);
    }

    #[test]
    fn flag_filters_follow_required_and_excluded_sets(
        subject in prop::collection::vec(any::<bool>(), 6),
        required in prop::collection::vec(any::<bool>(), 6),
        stale in any::<bool>(),
    ) {
        let filter = USER_FLAGS
            .iter()
            .zip(&required)
            .filter(|(_, on)| **on)
            .fold(Filter::any(), |filter, (&flag, _)| filter.include_flag(flag));
        let mark = flagmark_of(&subject).with(Flag::Stale, stale);
        let expected = !stale && required.iter().zip(&subject).all(|(&need, &has)| !need || has);
        prop_assert_eq!(filter.matches_flagmark(mark), expected);
    }
}
