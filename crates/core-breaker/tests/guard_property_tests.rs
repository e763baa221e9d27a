//! Property tests: arbitrary sequences of guard operations keep the state
//! machine consistent, and every reachable state survives the snapshot codec.

use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tripwire_core_breaker::{CircuitState, FakeClock, Guard, GuardConfig, StateSnapshot};

#[derive(Debug, Clone)]
enum Op {
    Success,
    Failure,
    CallOk,
    CallErr,
    Advance(u64),
    Reset,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Success),
        4 => Just(Op::Failure),
        3 => Just(Op::CallOk),
        3 => Just(Op::CallErr),
        2 => (0..120u64).prop_map(Op::Advance),
        1 => Just(Op::Reset),
    ]
}

fn arb_config() -> impl Strategy<Value = GuardConfig> {
    (0..6u32, 1..90u64, 0..4u32).prop_map(|(threshold, secs, trials)| {
        GuardConfig::default()
            .with_failure_threshold(threshold)
            .with_recovery_timeout(Duration::from_secs(secs))
            .with_half_open_max_calls(trials)
    })
}

fn apply(guard: &mut Guard, clock: &FakeClock, op: &Op) {
    match op {
        Op::Success => guard.record_success(),
        Op::Failure => guard.record_failure(),
        Op::CallOk => {
            let _ = guard.call(|| Ok::<_, ()>(()));
        }
        Op::CallErr => {
            let _ = guard.call(|| Err::<(), _>(()));
        }
        Op::Advance(secs) => clock.advance(Duration::from_secs(*secs)),
        Op::Reset => guard.reset(),
    }
}

proptest! {
    #[test]
    fn guard_invariants_hold(
        config in arb_config(),
        ops in proptest::collection::vec(arb_op(), 0..60)
    ) {
        let clock = FakeClock::new();
        let mut guard = Guard::with_clock("prop", config, Arc::new(clock.clone()));

        for op in &ops {
            apply(&mut guard, &clock, op);
            prop_assert_eq!(guard.invariant_violation(), None, "after {:?}", op);
        }
    }

    #[test]
    fn rejected_calls_never_run(
        config in arb_config(),
        ops in proptest::collection::vec(arb_op(), 0..40)
    ) {
        let clock = FakeClock::new();
        let mut guard = Guard::with_clock("prop", config, Arc::new(clock.clone()));
        for op in &ops {
            apply(&mut guard, &clock, op);
        }

        let admitted = guard.allows_calls();
        let mut ran = false;
        let result = guard.call(|| {
            ran = true;
            Ok::<_, ()>(())
        });
        prop_assert_eq!(ran, admitted);
        prop_assert_eq!(result.is_ok(), admitted);
    }

    #[test]
    fn reachable_snapshots_survive_json(
        config in arb_config(),
        ops in proptest::collection::vec(arb_op(), 0..60)
    ) {
        let clock = FakeClock::new();
        let mut guard = Guard::with_clock("prop", config.clone(), Arc::new(clock.clone()));
        for op in &ops {
            apply(&mut guard, &clock, op);
        }

        let snapshot = guard.snapshot();
        let decoded = StateSnapshot::from_json(&snapshot.to_json()).unwrap();
        prop_assert_eq!(&decoded, &snapshot);

        let restored = Guard::from_snapshot("prop", config, Arc::new(clock.clone()), Some(&decoded));
        prop_assert_eq!(restored.state(), guard.state());
        prop_assert_eq!(restored.failure_count(), guard.failure_count());
        prop_assert_eq!(restored.next_attempt_time(), guard.next_attempt_time());
        prop_assert_eq!(restored.invariant_violation(), None);
    }

    #[test]
    fn threshold_consecutive_failures_open(threshold in 1..20u32) {
        let clock = FakeClock::new();
        let config = GuardConfig::default().with_failure_threshold(threshold);
        let mut guard = Guard::with_clock("prop", config, Arc::new(clock));

        for _ in 0..threshold - 1 {
            guard.record_failure();
        }
        prop_assert_eq!(guard.state(), CircuitState::Closed);
        guard.record_failure();
        prop_assert_eq!(guard.state(), CircuitState::Open);
    }
}
