use std::time::Duration;

use harvest_core::{
    BackoffPolicy, FailureKind, FetchError, RetryMachine, RetryPolicy, RetryState, Strategy,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        backoff: BackoffPolicy {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            jitter_fraction: 0.0,
        },
        escalate_within_target: true,
        max_retry_after: Duration::from_secs(60),
    }
}

fn err(kind: FailureKind) -> FetchError {
    FetchError::new(kind, "test")
}

fn rng() -> StdRng {
    StdRng::seed_from_u64(42)
}

#[test]
fn retryable_failures_run_to_the_ceiling() {
    let mut machine = RetryMachine::new(policy(3), Strategy::Light);
    let mut rng = rng();
    let mut delays = Vec::new();

    while let Some((_, strategy)) = machine.begin_attempt() {
        assert_eq!(strategy, Strategy::Light);
        if let RetryState::Backoff { delay, .. } = machine.fail(err(FailureKind::Timeout), &mut rng) {
            delays.push(*delay);
        }
    }

    assert_eq!(machine.attempts(), 3);
    assert_eq!(delays, vec![Duration::from_secs(1), Duration::from_secs(2)]);
    match machine.state() {
        RetryState::Exhausted {
            attempts,
            last,
            retries_exhausted,
        } => {
            assert_eq!(*attempts, 3);
            assert_eq!(last.kind, FailureKind::Timeout);
            assert!(*retries_exhausted);
        }
        other => panic!("unexpected state {other:?}"),
    }
}

#[test]
fn terminal_failures_stop_after_one_attempt() {
    for kind in [FailureKind::Blocked, FailureKind::Disallowed, FailureKind::HttpStatus(404)] {
        let mut machine = RetryMachine::new(policy(3), Strategy::Light);
        machine.begin_attempt().unwrap();
        machine.fail(err(kind.clone()), &mut rng());

        assert!(machine.is_finished(), "{kind:?}");
        assert_eq!(machine.attempts(), 1);
        assert!(machine.begin_attempt().is_none());
        assert!(matches!(
            machine.state(),
            RetryState::Exhausted {
                retries_exhausted: false,
                ..
            }
        ));
    }
}

#[test]
fn empty_content_escalates_without_delay() {
    let mut machine = RetryMachine::new(policy(3), Strategy::Light);
    machine.begin_attempt().unwrap();
    let state = machine.fail(err(FailureKind::EmptyContent), &mut rng()).clone();
    assert!(matches!(
        state,
        RetryState::Backoff {
            delay,
            next_strategy: Strategy::Rendered,
            ..
        } if delay.is_zero()
    ));

    assert_eq!(machine.begin_attempt(), Some((2, Strategy::Rendered)));
    machine.fail(err(FailureKind::EmptyContent), &mut rng());
    assert!(machine.is_finished());
    assert_eq!(machine.attempts(), 2);
}

#[test]
fn escalation_can_be_disabled() {
    let mut policy = policy(3);
    policy.escalate_within_target = false;
    let mut machine = RetryMachine::new(policy, Strategy::Light);
    machine.begin_attempt().unwrap();
    machine.fail(err(FailureKind::EmptyContent), &mut rng());
    assert!(machine.is_finished());
}

#[test]
fn rate_limit_hint_stretches_backoff() {
    let mut machine = RetryMachine::new(policy(3), Strategy::Light);
    machine.begin_attempt().unwrap();
    let kind = FailureKind::RateLimited {
        retry_after: Some(Duration::from_secs(5)),
    };
    match machine.fail(err(kind), &mut rng()) {
        RetryState::Backoff { delay, .. } => assert_eq!(*delay, Duration::from_secs(5)),
        other => panic!("unexpected state {other:?}"),
    }
}

#[test]
fn rate_limit_hint_beyond_cap_ends_the_target() {
    let mut machine = RetryMachine::new(policy(3), Strategy::Light);
    machine.begin_attempt().unwrap();
    let kind = FailureKind::RateLimited {
        retry_after: Some(Duration::from_secs(86_400)),
    };
    assert_eq!(
        machine.fail(err(kind.clone()), &mut rng()),
        &RetryState::Exhausted {
            attempts: 1,
            last: err(kind),
            retries_exhausted: false,
        }
    );

    let mut at_cap = RetryMachine::new(policy(3), Strategy::Light);
    at_cap.begin_attempt().unwrap();
    let kind = FailureKind::RateLimited {
        retry_after: Some(Duration::from_secs(60)),
    };
    match at_cap.fail(err(kind), &mut rng()) {
        RetryState::Backoff { delay, .. } => assert_eq!(*delay, Duration::from_secs(60)),
        other => panic!("unexpected state {other:?}"),
    }
}

#[test]
fn success_and_abort_are_final() {
    let mut machine = RetryMachine::new(policy(3), Strategy::Rendered);
    assert_eq!(machine.begin_attempt(), Some((1, Strategy::Rendered)));
    machine.succeed();
    assert_eq!(machine.state(), &RetryState::Succeeded { attempts: 1 });

    machine.abort(err(FailureKind::Cancelled));
    assert_eq!(machine.state(), &RetryState::Succeeded { attempts: 1 });

    let mut pending = RetryMachine::new(policy(3), Strategy::Light);
    pending.abort(err(FailureKind::Cancelled));
    assert_eq!(pending.attempts(), 0);
    assert!(pending.is_finished());
}
