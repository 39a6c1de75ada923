//! Property tests for lifetime evaluation and transition idempotence.

use lapse_core::{
    end_of_life, has_elapsed, on_confirmed, on_lost, resolve_timestamp, Change, ChangeSet,
    DisableSource, DiscoveryRecord, DiscoveryStatus, LifetimePolicy, ObjectStatus, TIME_HORIZON,
};
use proptest::prelude::*;

fn arb_timestamp() -> impl Strategy<Value = i64> {
    prop_oneof![
        0i64..=TIME_HORIZON,
        (TIME_HORIZON - 1_000)..=(TIME_HORIZON + 1_000),
        any::<i32>().prop_map(i64::from),
    ]
}

fn arb_duration() -> impl Strategy<Value = i64> {
    prop_oneof![0i64..=10_000_000, any::<i64>(), Just(i64::MAX)]
}

fn arb_policy() -> impl Strategy<Value = LifetimePolicy> {
    prop_oneof![
        (0i64..=100_000_000).prop_map(LifetimePolicy::after),
        Just(LifetimePolicy::immediately()),
        Just(LifetimePolicy::never()),
    ]
}

proptest! {
    #[test]
    fn end_of_life_never_exceeds_horizon(lastcheck in arb_timestamp(), duration in arb_duration()) {
        prop_assert!(end_of_life(lastcheck, duration) <= TIME_HORIZON);
    }

    #[test]
    fn end_of_life_monotonic_in_duration(
        lastcheck in arb_timestamp(),
        a in arb_duration(),
        b in arb_duration(),
    ) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(end_of_life(lastcheck, lo) <= end_of_life(lastcheck, hi));
    }

    #[test]
    fn immediately_and_never_are_constant(lastcheck in any::<i64>()) {
        prop_assert_eq!(resolve_timestamp(lastcheck, &LifetimePolicy::immediately()), 1);
        prop_assert_eq!(resolve_timestamp(lastcheck, &LifetimePolicy::never()), 0);
    }

    #[test]
    fn unscheduled_never_elapses(now in any::<i64>()) {
        prop_assert!(!has_elapsed(now, 0));
    }

    #[test]
    fn confirmed_twice_stages_only_lastcheck(times in 1usize..5) {
        let mut record = DiscoveryRecord::new(1, "obj");
        for _ in 0..times {
            on_confirmed(&mut record, DiscoveryStatus::Normal, 0);
            prop_assert_eq!(record.changes, ChangeSet::of(&[Change::Lastcheck]));
        }
    }

    #[test]
    fn never_policy_never_deletes(
        lastcheck in arb_timestamp(),
        now in any::<i64>(),
        ts_delete in arb_timestamp(),
    ) {
        let mut record = DiscoveryRecord::new(1, "obj");
        on_lost(
            &mut record,
            ObjectStatus::Enabled,
            lastcheck,
            now,
            &LifetimePolicy::never(),
            DiscoveryStatus::Normal,
            DisableSource::LostDiscovery,
            ts_delete,
        );
        prop_assert!(!record.has(Change::Delete));
    }

    #[test]
    fn lost_schedule_matches_policy(
        lastcheck in 0i64..=TIME_HORIZON,
        now in 0i64..=TIME_HORIZON,
        policy in arb_policy(),
    ) {
        let mut record = DiscoveryRecord::new(1, "obj");
        on_lost(
            &mut record,
            ObjectStatus::Enabled,
            lastcheck,
            now,
            &policy,
            DiscoveryStatus::Lost,
            DisableSource::Default,
            -1,
        );
        let ts = resolve_timestamp(lastcheck, &policy);
        prop_assert!(record.has(Change::TsDelete));
        prop_assert_eq!(record.ts_delete, ts);
        prop_assert_eq!(record.has(Change::Delete), has_elapsed(now, ts));
    }
}
