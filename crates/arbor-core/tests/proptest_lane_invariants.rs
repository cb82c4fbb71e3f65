//! Property-based invariant tests for the lane algebra.
//!
//! Verifies:
//! - merge is commutative and associative
//! - highest lane is deterministic, a member of the input, and non-zero
//!   unless the input is empty
//! - sync lanes are always selected first
//! - entanglement is transitive through shared lanes
//! - next_lanes only ever returns pending lanes

use std::time::Duration;

use arbor_core::{LaneConfig, Lanes, RootLanes};
use proptest::prelude::*;

// ═════════════════════════════════════════════════════════════════════════
// Strategies
// ═════════════════════════════════════════════════════════════════════════

fn lanes_strategy() -> impl Strategy<Value = Lanes> {
    any::<u32>().prop_map(Lanes::from_bits_truncate)
}

fn single_lane_strategy() -> impl Strategy<Value = Lanes> {
    (0usize..26).prop_map(Lanes::from_index)
}

fn transition_lane_strategy() -> impl Strategy<Value = Lanes> {
    (3usize..=18).prop_map(Lanes::from_index)
}

// ═════════════════════════════════════════════════════════════════════════
// Algebra
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn merge_is_commutative(a in lanes_strategy(), b in lanes_strategy()) {
        prop_assert_eq!(a.merge(b), b.merge(a));
    }

    #[test]
    fn merge_is_associative(a in lanes_strategy(), b in lanes_strategy(), c in lanes_strategy()) {
        prop_assert_eq!(a.merge(b).merge(c), a.merge(b.merge(c)));
    }

    #[test]
    fn intersect_is_subset(a in lanes_strategy(), b in lanes_strategy()) {
        let i = a.intersect(b);
        prop_assert!(i.is_subset_of(a));
        prop_assert!(i.is_subset_of(b));
    }

    #[test]
    fn highest_of_merge_is_deterministic(a in lanes_strategy(), b in lanes_strategy()) {
        let first = a.merge(b).highest_priority_lane();
        let second = b.merge(a).highest_priority_lane();
        prop_assert_eq!(first, second);
        prop_assert_eq!(first.is_empty(), a.is_empty() && b.is_empty());
    }

    #[test]
    fn highest_is_single_member(a in lanes_strategy()) {
        let h = a.highest_priority_lane();
        if a.is_empty() {
            prop_assert!(h.is_empty());
        } else {
            prop_assert_eq!(h.count(), 1);
            prop_assert!(h.is_subset_of(a));
            // Nothing in the set outranks it.
            if !h.includes_sync_lane() {
                prop_assert!(!a.includes_sync_lane());
                for lane in a.iter() {
                    prop_assert!(lane.bits() >= h.bits());
                }
            }
        }
    }

    #[test]
    fn sync_always_selected(a in lanes_strategy()) {
        let with_sync = a | Lanes::SYNC;
        prop_assert_eq!(with_sync.highest_priority_lane(), Lanes::SYNC);
    }

    #[test]
    fn group_contains_highest(a in lanes_strategy()) {
        let group = a.highest_priority_lanes();
        prop_assert!(group.is_subset_of(a));
        prop_assert!(a.highest_priority_lane().is_subset_of(group));
    }
}

// ═════════════════════════════════════════════════════════════════════════
// Root bookkeeping
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn entanglement_transitive(
        a in transition_lane_strategy(),
        b in transition_lane_strategy(),
        c in transition_lane_strategy(),
    ) {
        let mut root = RootLanes::new();
        root.mark_entangled(c | a);
        root.mark_entangled(a | b);
        prop_assert!(root.is_entangled(c, b));
        prop_assert!(root.is_entangled(a, b));
    }

    #[test]
    fn next_lanes_subset_of_pending(
        updates in prop::collection::vec(single_lane_strategy(), 0..8),
        suspended in lanes_strategy(),
        wip in lanes_strategy(),
    ) {
        let mut root = RootLanes::new();
        for lane in &updates {
            root.mark_updated(*lane);
        }
        root.mark_suspended(suspended & root.pending);
        let next = root.next_lanes(Lanes::NONE);
        prop_assert!(next.is_subset_of(root.pending));
        let runnable = root.pending.remove(root.suspended) & Lanes::NON_IDLE_LANES;
        if !runnable.is_empty() {
            prop_assert!(!next.is_empty());
        }

        let with_wip = root.next_lanes(wip);
        prop_assert!(with_wip == next || with_wip == wip);
    }

    #[test]
    fn expiration_never_precedes_deadline(
        lane in single_lane_strategy(),
        start in 0u64..10_000,
        elapsed in 0u64..20_000,
    ) {
        let cfg = LaneConfig::default();
        let mut root = RootLanes::new();
        root.mark_updated(lane);
        root.mark_starved_lanes_as_expired(Duration::from_millis(start), &cfg);
        let later = Duration::from_millis(start + elapsed);
        root.mark_starved_lanes_as_expired(later, &cfg);
        match cfg.compute_expiration_time(lane, Duration::from_millis(start)) {
            Some(deadline) => prop_assert_eq!(root.includes_expired(lane), later >= deadline),
            None => prop_assert!(!root.includes_expired(lane)),
        }
    }
}
