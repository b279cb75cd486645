use std::time::{Duration, Instant};

use harvest_core::{AttemptOutcome, EscalationPolicy, FailureKind, Strategy, StrategyStats};

fn empty() -> AttemptOutcome {
    AttemptOutcome::Failed(FailureKind::EmptyContent)
}

#[test]
fn three_insufficient_light_fetches_escalate_for_good() {
    let policy = EscalationPolicy::default();
    let now = Instant::now();
    let mut stats = StrategyStats::new();

    assert!(!stats.record(Strategy::Light, &empty(), &policy, now));
    assert!(!stats.record(
        Strategy::Light,
        &AttemptOutcome::Failed(FailureKind::Blocked),
        &policy,
        now
    ));
    assert_eq!(stats.preferred(), Strategy::Light);
    assert!(stats.record(Strategy::Light, &empty(), &policy, now));
    assert_eq!(stats.preferred(), Strategy::Rendered);

    // Sticky: a later light success does not de-escalate.
    stats.record(Strategy::Light, &AttemptOutcome::Succeeded, &policy, now);
    assert_eq!(stats.preferred(), Strategy::Rendered);

    stats.reset();
    assert_eq!(stats.preferred(), Strategy::Light);
}

#[test]
fn light_success_breaks_the_streak() {
    let policy = EscalationPolicy::default();
    let now = Instant::now();
    let mut stats = StrategyStats::new();

    stats.record(Strategy::Light, &empty(), &policy, now);
    stats.record(Strategy::Light, &empty(), &policy, now);
    stats.record(Strategy::Light, &AttemptOutcome::Succeeded, &policy, now);
    stats.record(Strategy::Light, &empty(), &policy, now);
    assert_eq!(stats.consecutive_insufficient(), 1);
    assert_eq!(stats.preferred(), Strategy::Light);
    assert_eq!(stats.counters(Strategy::Light).successes, 1);
    assert_eq!(stats.counters(Strategy::Light).failures, 3);
}

#[test]
fn transient_failures_are_neutral() {
    let policy = EscalationPolicy::default();
    let now = Instant::now();
    let mut stats = StrategyStats::new();

    stats.record(Strategy::Light, &empty(), &policy, now);
    stats.record(
        Strategy::Light,
        &AttemptOutcome::Failed(FailureKind::Timeout),
        &policy,
        now,
    );
    stats.record(Strategy::Light, &empty(), &policy, now);
    assert_eq!(stats.consecutive_insufficient(), 2);
}

#[test]
fn failures_outside_the_window_are_forgotten() {
    let policy = EscalationPolicy {
        threshold: 3,
        window: Duration::from_secs(60),
    };
    let start = Instant::now();
    let mut stats = StrategyStats::new();

    stats.record(Strategy::Light, &empty(), &policy, start);
    stats.record(Strategy::Light, &empty(), &policy, start + Duration::from_secs(30));
    stats.record(Strategy::Light, &empty(), &policy, start + Duration::from_secs(90));
    assert_eq!(stats.consecutive_insufficient(), 2);
    assert!(!stats.is_escalated());
}

#[test]
fn rendered_outcomes_only_touch_counters() {
    let policy = EscalationPolicy::default();
    let now = Instant::now();
    let mut stats = StrategyStats::new();
    for _ in 0..5 {
        stats.record(Strategy::Rendered, &empty(), &policy, now);
    }
    assert_eq!(stats.preferred(), Strategy::Light);
    assert_eq!(stats.counters(Strategy::Rendered).failures, 5);
    assert_eq!(StrategyStats::pre_escalated().preferred(), Strategy::Rendered);
}
